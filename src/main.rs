fn main() {
    if let Err(err) = troupe::cli::main() {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}
