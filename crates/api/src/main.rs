use agentform_infra::config::Settings;
use agentform_observability::LogFormat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    agentform_observability::init(&settings.log.level, LogFormat::from_json_flag(settings.log.json));

    agentform_api::server::run(settings).await
}
