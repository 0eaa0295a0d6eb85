fn main() {
    if let Err(error) = quote_stream::run() {
        eprintln!("quote-stream failed: {error}");
        std::process::exit(1);
    }
}
