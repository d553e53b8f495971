mod app;
mod control;
mod gateway;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app::run().await
}
