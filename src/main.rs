#[tokio::main]
async fn main() -> anyhow::Result<()> {
    note_shelf_lib::run().await
}
