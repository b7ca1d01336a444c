use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = vodforgectl::Cli::parse();
    if let Err(err) = vodforgectl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
