use std::future::Future;

use bluetooth_ranging::utils::logging::init_logging;
use log::LevelFilter;
use tokio::{sync::mpsc::UnboundedReceiver, task::LocalSet};

pub fn start_test(f: impl Future<Output = ()>) {
    tokio_test::block_on(async move {
        init_logging(LevelFilter::Debug);
        LocalSet::new().run_until(f).await;
    });
}

/// Everything sent on the channel so far
#[allow(dead_code)]
pub fn drain<T>(rx: &mut UnboundedReceiver<T>) -> Vec<T> {
    let mut events = vec![];
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
