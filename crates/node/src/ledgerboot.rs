fn main() {
    if let Err(err) = ledgerboot::run_entry() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
