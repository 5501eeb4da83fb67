use chat_client::config::Config;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();

    // stdout belongs to the chat output contract, so the logger stays
    // quiet unless something is actually wrong
    simple_logger::init_with_level(log::Level::Warn)?;

    chat_client::client_main(config).await
}
