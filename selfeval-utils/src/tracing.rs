use std::io;

pub fn setup_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::{
        layer::SubscriberExt,
        util::SubscriberInitExt,
        {fmt, EnvFilter},
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_timer(fmt::time::ChronoLocal::rfc3339())
        .with_writer(io::stderr)
        .finish()
        .with(ErrorLayer::default())
        .init();
}
