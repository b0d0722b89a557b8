use std::rc::Rc;

use serde_json::Value;
use tracing::warn;

use zof_proto::{Event, EventType};

use crate::config::Config;
use crate::datapath::Datapath;
use crate::transport::RpcTransport;

/// Performs the `[negotiating] -> [ready]` transition of the per-connection
/// state machine: runs `features_request` and
/// `port_desc_request` concurrently, then merges both replies with the
/// helper-reported connection attributes into the synthesized CHANNEL_UP
/// event. Returns `None` on negotiation failure, which the caller treats as
/// `[negotiating] -> [absent]` — the connection is discarded without a
/// user-visible event, only a logged warning.
pub async fn negotiate(
    conn_id: u64,
    raw: Value,
    transport: Rc<RpcTransport>,
    config: &Config,
) -> Option<(Rc<Datapath>, Event)> {
    let version = raw.get("version").and_then(Value::as_u64).unwrap_or(4) as u8;

    let features_call = transport.call("OFP.REQUEST", request_params(conn_id, "FEATURES_REQUEST"));
    let port_desc_call = transport.call("OFP.REQUEST", request_params(conn_id, "PORT_DESC_REQUEST"));
    let (features, ports) = tokio::join!(features_call, port_desc_call);

    let features = match features {
        Ok(value) => value,
        Err(err) => {
            warn!("negotiation failed for conn_id {conn_id}: features_request: {err}");
            return None;
        }
    };
    let ports = match ports {
        Ok(value) => value,
        Err(err) => {
            warn!("negotiation failed for conn_id {conn_id}: port_desc_request: {err}");
            return None;
        }
    };

    let dpid = features
        .get("datapath_id")
        .and_then(Value::as_str)
        .unwrap_or("00:00:00:00:00:00:00:00")
        .to_string();

    // The helper's port_desc_request reply is either the ports array
    // itself, or that array wrapped under a `ports` key — unwrap the
    // latter so `Datapath::ports()` and the synthesized event body both
    // carry the full ports array from the port-description reply
    // rather than the reply envelope.
    let ports = match ports {
        Value::Object(ref map) if map.contains_key("ports") => map["ports"].clone(),
        other => other,
    };

    let dp = Rc::new(Datapath::new(
        conn_id,
        dpid,
        version,
        features.clone(),
        ports.clone(),
        transport,
        config,
    ));

    let mut body = raw;
    insert_field(&mut body, "features", features);
    insert_field(&mut body, "ports", ports);
    let event = Event::new(EventType::ChannelUp, Some(conn_id), body);

    Some((dp, event))
}

fn request_params(conn_id: u64, request_type: &str) -> Value {
    serde_json::json!({ "conn_id": conn_id, "type": request_type })
}

fn insert_field(body: &mut Value, key: &str, value: Value) {
    if let Value::Object(map) = body {
        map.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::transport::RpcTransport;

    #[tokio::test]
    async fn negotiation_over_a_closed_transport_fails_and_returns_none() {
        // `RpcTransport::detached()` has no pump task, so every `call`
        // resolves only once its oneshot sender is dropped — which never
        // happens here, but the transport reports `Closed` as soon as the
        // writer channel has no receiver, exercising the failure path
        // without needing a live helper.
        let transport = Rc::new(RpcTransport::detached());
        let raw = serde_json::json!({"conn_id": 1, "version": 4});
        let result = negotiate(1, raw, transport, &Config::default()).await;
        assert!(result.is_none());
    }
}
