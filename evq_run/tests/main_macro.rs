//! Exercises `#[evq_run::main]`; built without the test harness so the macro
//! can generate the real `main`.

#[evq_run::main]
async fn main() {
    let handles: Vec<_> = (0..5u64)
        .map(|i| evq_run::dispatch(move || i * i).expect("dispatch inside main"))
        .collect();

    let mut squares = Vec::new();
    for handle in handles {
        squares.push(handle.await.expect("task result"));
    }
    squares.sort_unstable();

    assert_eq!(squares, vec![0, 1, 4, 9, 16]);
    println!("main_macro: ok");
}
