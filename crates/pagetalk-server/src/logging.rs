use env_logger::Env;

/// Default filter keeps dependency noise down while surfacing our own crates.
pub fn init_logging(debug: bool) {
    let filter = if debug {
        "debug,actix_web=info,reqwest=info,hyper=info"
    } else {
        "info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .init();
}
