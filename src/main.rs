#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = examgate_rust::run().await {
        eprintln!("examgate fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
