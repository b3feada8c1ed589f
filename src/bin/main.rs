//! Binary entrypoint for the focus tool

fn main() {
    if let Err(e) = focuskeeper::cli::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
