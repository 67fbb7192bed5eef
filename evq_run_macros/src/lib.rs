use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemFn, ReturnType};

/// Runs an async `main` on an `evq_run` runtime.
///
/// The runtime is started with the default configuration and entered before
/// the body runs, so `evq_run::dispatch` and `evq_run::cancel` work inside it.
/// The body is driven by `Runtime::block_on` on the main thread while the
/// event loop runs on its own thread. Once the body finishes the runtime is
/// shut down, and tasks still queued at that point resolve as abandoned.
///
/// The return type of `main` is kept, so `main` may return a `Result`.
///
/// # Panics
///
/// The generated `main` panics if the runtime cannot be started or if the
/// event loop failed by the time it is shut down.
///
/// # Examples
///
/// ```ignore
/// #[evq_run::main]
/// async fn main() {
///     let handle = evq_run::dispatch(|| 6 * 7).unwrap();
///     assert_eq!(handle.await.unwrap(), 42);
/// }
/// ```
///
/// Applying it to a function that is not `async`, or not named `main`, is a
/// compile error.
#[proc_macro_attribute]
pub fn main(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    let name = &input.sig.ident;
    let body = &input.block;
    let attrs = &input.attrs;
    let vis = &input.vis;
    let output = &input.sig.output;

    if input.sig.asyncness.is_none() {
        return quote! { compile_error!("The #[evq_run::main] function must be async"); }.into();
    }

    if name != "main" {
        return quote! {
            compile_error!("#[evq_run::main] can only be applied to the 'main' function");
        }
        .into();
    }

    let ret = match output {
        ReturnType::Default => quote! { () },
        ReturnType::Type(_, ty) => quote! { #ty },
    };

    let result = quote! {
        #(#attrs)*
        #vis fn main() #output {
            let runtime = ::evq_run::Runtime::new()
                .expect("failed to start the evq_run runtime");

            let output: #ret = runtime.block_on(async move {
                let output: #ret = #body;
                output
            });

            if let Err(err) = runtime.shutdown() {
                panic!("evq_run event loop failed: {err}");
            }
            output
        }
    };
    result.into()
}
