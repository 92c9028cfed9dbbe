#[tokio::main]
async fn main() {
    if let Err(e) = reqstat::app::run::main_with_error().await {
        eprintln!("reqstat: {:#}", e);
        std::process::exit(1);
    }
}
