use std::cell::Cell;
use std::rc::Rc;

use zof::{Config, ExitSignal, HandlersBuilder};

#[test]
fn config_defaults_are_stable_across_the_facade() {
    let config = Config::default();
    assert_eq!(config.listen_versions, vec![4]);
    assert_eq!(config.exit_signals, vec![ExitSignal::Interrupt, ExitSignal::Terminate]);
}

#[tokio::test]
async fn on_exception_handler_observes_a_handler_failure() {
    let seen: Rc<Cell<bool>> = Rc::new(Cell::new(false));
    let seen_clone = seen.clone();

    let handlers = HandlersBuilder::new()
        .on_exception(move |err| {
            assert_eq!(err.event_type, "start");
            seen_clone.set(true);
        })
        .build();

    handlers.on_exception(&zof::HandlerError {
        event_type: "start".to_string(),
        conn_id: None,
        message: "boom".to_string(),
    });

    assert!(seen.get());
}
