use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    // Deep recursion in the descent parser and the generator scales with
    // source nesting; run on a thread with a generous stack and treat a
    // panic as an internal error (exit 125 by convention).
    const STACK_SIZE: usize = 64 * 1024 * 1024;
    let builder = std::thread::Builder::new().stack_size(STACK_SIZE);
    let handle = builder
        .spawn(|| {
            let args: Vec<String> = std::env::args().collect();
            vmcc::run(args)
        })
        .expect("failed to spawn compiler thread");

    match handle.join() {
        Ok(code) => ExitCode::from(code as u8),
        Err(panic) => {
            if let Some(message) = panic.downcast_ref::<&str>() {
                eprintln!("vmcc: internal error: {}", message);
            } else if let Some(message) = panic.downcast_ref::<String>() {
                eprintln!("vmcc: internal error: {}", message);
            } else {
                eprintln!("vmcc: internal error (thread panicked)");
            }
            ExitCode::from(125)
        }
    }
}
