fn main() {
    if let Err(err) = fbref_stage::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
