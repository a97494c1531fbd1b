use dicom_inbox::LogFormat;

fn main() -> anyhow::Result<()> {
    let settings = dicom_inbox::load_settings()?;
    init_tracing(&settings.log_level, settings.log_format);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(dicom_inbox::run(settings))
}

fn init_tracing(log_level: &str, log_format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match log_format {
        LogFormat::Pretty => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}
