fn main() {
    if let Err(err) = webscan::cli::run() {
        webscan::ui::eprintln_error(&err);
        std::process::exit(webscan::exit::exit_code(&err));
    }
}
