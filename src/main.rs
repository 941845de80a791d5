fn main() {
    if let Err(err) = datasus_etl::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
