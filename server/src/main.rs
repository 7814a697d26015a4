use std::io::Write;
use std::time::Duration;

use tso::{Bootstrap, CancelScope, Config, Constant};

pub fn main() {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            writeln!(
                buf,
                "{} [{}] - {}",
                timestamp,
                record.level(),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .write_style(env_logger::WriteStyle::Always)
        .init();

    let config = Config {
        dc_locations: vec!["dc-1".into(), "dc-2".into()],
        ..Config::default()
    };

    let root_scope = CancelScope::new();
    let manager = Bootstrap::start_server(config, root_scope.clone()).unwrap();

    log::info!("alloc loop will begin...");

    let scope = root_scope.clone();
    std::thread::spawn(move || {
        for _ in 0..30 {
            if scope.is_cancelled() {
                break;
            }

            match manager.handle_tso_request(Constant::GLOBAL_DC_LOCATION, 1) {
                Ok(ts) => log::info!("alloc new global ts: {}", ts),
                Err(e) => log::warn!("global tso not ready, error: {}", e),
            }
            match manager.handle_tso_request("dc-1", 1) {
                Ok(ts) => log::info!("alloc new dc-1 ts: {}", ts),
                Err(e) => log::warn!("dc-1 tso not ready, error: {}", e),
            }

            std::thread::sleep(Duration::from_secs(1));
        }

        // exit
        scope.cancel();
    });

    root_scope.wait_cancelled();

    log::info!("exit")
}
