//! A minimal controller that logs every switch connecting/disconnecting
//! and acknowledges `packet_in` messages by logging them — it sends
//! nothing back to the switch, so it is safe to point at a real `oftr`
//! without risking a flood of flow-mods.
//!
//! Flags:
//! - `--oftr <path>` to point at a non-default helper binary.
//! - `ZOFDEBUG=1` to elevate logging and pass `--trace=rpc` to the helper.
//!
//! Example:
//! ```bash
//! cargo run -p zof --example echo_controller -- --oftr /usr/local/bin/oftr
//! ```

use std::env;

use zof::{Config, ConfigBuilder, Controller, HandlersBuilder};

fn parse_config() -> Config {
    let mut builder = ConfigBuilder::new().listen_endpoints(["0.0.0.0:6653"]);
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--oftr" {
            if let Some(path) = args.next() {
                builder = builder.oftr_path(path);
            }
        }
    }
    builder.build()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), zof::ZofError> {
    tracing_subscriber::fmt::init();

    let handlers = HandlersBuilder::new()
        .on_start(|_handle| async move {
            tracing::info!("controller starting");
            Ok(())
        })
        .on_channel_up(|dp, _event| async move {
            tracing::info!(dpid = dp.dpid(), version = dp.version(), "datapath connected");
            Ok(())
        })
        .on_channel_down(|dp, _event| async move {
            tracing::info!(dpid = dp.dpid(), "datapath disconnected");
            Ok(())
        })
        .on_type("packet_in", |dp, event| async move {
            tracing::debug!(dpid = dp.dpid(), body = %event.body, "packet_in");
            Ok(())
        })
        .on_exception(|err| {
            tracing::error!("{err}");
        })
        .build();

    Controller::new(parse_config(), handlers).run().await
}
