mod sim;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sim::run().await
}
