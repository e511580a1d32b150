use tracing::{info_span, Level};

use sniproxy_core::{init_runtime, init_settings, init_tracing, run_servers};

fn main() {
    init_tracing(Level::INFO);

    let _span = info_span!("startup").entered();

    let conf = init_settings().expect("could not load config");

    let tokio = init_runtime(conf).expect("could not create tokio runtime");

    drop(_span);
    run_servers(conf, &tokio);
}
