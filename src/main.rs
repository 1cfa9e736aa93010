use colored::Colorize;

fn main() {
    if let Err(e) = multiquery::run() {
        let code = e.exit_code();
        eprintln!("{} {:#}", "ERROR:".red().bold(), anyhow::Error::new(e));
        std::process::exit(code);
    }
}
