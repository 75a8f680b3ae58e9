fn main() {
    match tracegate::run() {
        Ok(code) => std::process::exit(code),
        Err(failure) => {
            eprintln!("{}", failure);
            std::process::exit(failure.exit_code());
        }
    }
}
