#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jobwatch_lib::run().await
}
