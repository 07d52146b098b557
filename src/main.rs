fn main() {
    std::process::exit(match nmk::run::run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {}", err);
            1
        }
    });
}
