//! End-to-end exercise of `Controller::run` against a fake helper process —
//! a tiny `/bin/sh` script standing in for `oftr`, driving a real external
//! binary rather than mocking the process boundary.
//!
//! Covers a successful negotiation followed by a clean shutdown: every
//! CHANNEL_UP must eventually be followed by exactly one CHANNEL_DOWN, here
//! via the shutdown-time synthesis path rather than a helper-sent
//! notification.

use std::cell::RefCell;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::rc::Rc;
use std::time::Duration;

use tempfile::NamedTempFile;

use zof_core::{Config, ConfigBuilder, Controller, HandlersBuilder};

/// Writes an executable shell script that:
/// - immediately emits a synthetic `CHANNEL_UP` notification for conn_id 1,
/// - answers `FEATURES_REQUEST`/`PORT_DESC_REQUEST` by grepping the
///   (single-line) JSON request for the type name and the numeric `id`,
/// - exits as soon as it observes an `OFP.CLOSE` request, closing its
///   stdout and ending the helper event stream.
fn fake_oftr_script() -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp script");
    let script = r#"#!/bin/sh
printf '{"method":"OFP.MESSAGE","params":{"type":"CHANNEL_UP","conn_id":1,"version":4,"endpoint":"10.0.0.1:9999"}}\n'
while IFS= read -r line; do
  case "$line" in
    *FEATURES_REQUEST*)
      id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
      printf '{"id":%s,"result":{"datapath_id":"00:11:22:33:44:55:66:77"}}\n' "$id"
      ;;
    *PORT_DESC_REQUEST*)
      id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
      printf '{"id":%s,"result":{"ports":[{"port_no":1},{"port_no":2}]}}\n' "$id"
      ;;
    *OFP.CLOSE*)
      break
      ;;
  esac
done
"#;
    file.write_all(script.as_bytes()).expect("write script");
    file.flush().expect("flush script");
    let mut perms = file.as_file().metadata().expect("metadata").permissions();
    perms.set_mode(0o755);
    file.as_file().set_permissions(perms).expect("chmod script");
    file
}

fn test_config(script_path: &std::path::Path) -> Config {
    ConfigBuilder::new()
        .oftr_path(script_path)
        .rpc_timeout(Duration::from_secs(2))
        .shutdown_grace(Duration::from_millis(200))
        .build()
}

#[tokio::test]
async fn negotiation_success_then_clean_shutdown_synthesizes_channel_down() {
    let script = fake_oftr_script();
    let config = test_config(script.path());

    let seen_dpid: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
    let seen_ports: Rc<RefCell<Option<serde_json::Value>>> = Rc::new(RefCell::new(None));
    let channel_down_count = Rc::new(RefCell::new(0u32));
    let started = Rc::new(RefCell::new(false));
    let stopped = Rc::new(RefCell::new(false));

    let seen_dpid_up = seen_dpid.clone();
    let seen_ports_up = seen_ports.clone();
    let channel_down_count_down = channel_down_count.clone();
    let started_clone = started.clone();
    let stopped_clone = stopped.clone();

    let handlers = HandlersBuilder::new()
        .on_start(move |_handle| {
            let started = started_clone.clone();
            async move {
                *started.borrow_mut() = true;
                Ok(())
            }
        })
        .on_stop(move |_handle| {
            let stopped = stopped_clone.clone();
            async move {
                *stopped.borrow_mut() = true;
                Ok(())
            }
        })
        .on_channel_up(move |dp, event| {
            let seen_dpid = seen_dpid_up.clone();
            let seen_ports = seen_ports_up.clone();
            async move {
                *seen_dpid.borrow_mut() = Some(dp.dpid().to_string());
                *seen_ports.borrow_mut() = event.body.get("ports").cloned();
                dp.close().await;
                Ok(())
            }
        })
        .on_channel_down(move |_dp, _event| {
            let channel_down_count = channel_down_count_down.clone();
            async move {
                *channel_down_count.borrow_mut() += 1;
                Ok(())
            }
        })
        .build();

    let controller = Controller::new(config, handlers);
    let result = tokio::time::timeout(Duration::from_secs(5), controller.run())
        .await
        .expect("controller.run() should finish once the helper exits");

    assert!(result.is_ok(), "run() should exit cleanly: {result:?}");
    assert!(*started.borrow(), "on_start must run before dispatch begins");
    assert!(*stopped.borrow(), "on_stop must run even after an abrupt helper exit");
    assert_eq!(
        seen_dpid.borrow().as_deref(),
        Some("00:11:22:33:44:55:66:77")
    );
    assert_eq!(
        seen_ports.borrow().as_ref(),
        Some(&serde_json::json!([{"port_no": 1}, {"port_no": 2}]))
    );
    assert_eq!(
        *channel_down_count.borrow(),
        1,
        "exactly one CHANNEL_DOWN must follow the single CHANNEL_UP"
    );
}
