mod channel;
mod host;
mod reconciler;
mod store;
#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
