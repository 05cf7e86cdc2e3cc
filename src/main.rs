use anyhow::Context;
use opq_agent::{Agent, ConsoleEvents};

/// 用法: opq-agent [config.toml] [addr qq]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut builder = Agent::builder().events(ConsoleEvents);
    if let Some(path) = args.first() {
        builder = builder.config_path(path);
    }
    if let [_, addr, qq, ..] = args.as_slice() {
        let qq = qq
            .parse::<u64>()
            .with_context(|| format!("无效的 QQ 号: {}", qq))?;
        builder = builder.opq(addr.as_str(), qq);
    }

    builder.build().run().await?;
    Ok(())
}
