use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    // sqlx logs every statement at info.
    for directive in ["sync_service=info", "meter_client=info", "sqlx=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
