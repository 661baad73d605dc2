//! End-to-end scenarios against the mock service.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use objlink_client::{
    async_callback, blocking_callback, Address, AgentId, ApiId, CallbackError, Link, LinkConfig,
    LinkError, MockTransport, ObjectOptions, ObjectStage, Payload, ShareHandler,
};
use objlink_types::{ObjectRecord, OpCode};

fn connect() -> (Link, MockTransport) {
    let transport = MockTransport::new();
    let link = Link::connect_with_transport(
        LinkConfig::new("ws://mock").with_thread_name("scenario"),
        Arc::new(transport.clone()),
    )
    .unwrap();
    (link, transport)
}

fn api(name: &str) -> ApiId {
    ApiId::from_content(name.as_bytes())
}

fn dynamic_options() -> ObjectOptions {
    ObjectOptions::new()
        .with_api_id(api("notes"))
        .with_dynamic(true)
}

fn foreign_record(dynamic: bool, payload: &[u8]) -> ObjectRecord {
    ObjectRecord {
        address: Address::random(),
        author: AgentId::random(),
        payload: Payload::from(payload),
        api_id: Some(api("notes")),
        private: false,
        dynamic,
        legroom: 3,
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

// ===========================================
// Derived Property Tests
// ===========================================

#[test]
fn mutable_is_dynamic_and_owned() {
    let (link, transport) = connect();

    let own_static = link
        .blocking_new_object(b"s", ObjectOptions::new().with_api_id(api("notes")))
        .unwrap();
    let own_dynamic = link.blocking_new_object(b"d", dynamic_options()).unwrap();

    let record = foreign_record(true, b"theirs");
    let address = record.address;
    transport.seed_object(record, None);
    let foreign_dynamic = link.blocking_get_object(address).unwrap();

    for handle in [&own_static, &own_dynamic, &foreign_dynamic] {
        assert_eq!(
            handle.is_mutable().unwrap(),
            handle.is_dynamic().unwrap() && handle.is_owned().unwrap()
        );
    }
    assert!(own_dynamic.is_mutable().unwrap());
    assert!(!own_static.is_mutable().unwrap());
    assert!(!foreign_dynamic.is_mutable().unwrap());
}

#[test]
fn is_link_only_for_dynamic() {
    let (link, _transport) = connect();
    let fixed = link
        .blocking_new_object(b"s", ObjectOptions::new().with_api_id(api("notes")))
        .unwrap();
    let plain = link.blocking_new_object(b"d", dynamic_options()).unwrap();
    let proxy = link
        .blocking_new_object(plain.address().unwrap(), dynamic_options())
        .unwrap();

    assert_eq!(fixed.is_link().unwrap(), None);
    assert_eq!(plain.is_link().unwrap(), Some(false));
    assert_eq!(proxy.is_link().unwrap(), Some(true));
}

// ===========================================
// Lifecycle Scenarios
// ===========================================

#[test]
fn freeze_snapshots_without_touching_source() {
    let (link, _transport) = connect();
    let source = link.blocking_new_object(b"draft", dynamic_options()).unwrap();

    let frozen = link.blocking_freeze(&source).unwrap();

    assert!(!frozen.is_dynamic().unwrap());
    assert_eq!(frozen.stage(), ObjectStage::Static);
    assert_eq!(frozen.state().unwrap(), source.state().unwrap());
    assert!(source.is_dynamic().unwrap());
    assert_eq!(source.state().unwrap(), b"draft".to_vec());
}

#[test]
fn update_of_foreign_object_is_refused() {
    let (link, transport) = connect();
    let record = foreign_record(true, b"theirs");
    let address = record.address;
    transport.seed_object(record, None);
    let handle = link.blocking_get_object(address).unwrap();

    let result = link.blocking_update(&handle, b"mine");
    assert!(matches!(result, Err(LinkError::Permission(_))));
    assert_eq!(handle.state().unwrap(), b"theirs".to_vec());
}

#[test]
fn private_object_of_another_application_is_refused() {
    let (link, transport) = connect();
    let mut record = foreign_record(false, b"secret");
    record.private = true;
    let address = record.address;
    transport.seed_object(record, Some(transport.issue_token()));

    assert!(matches!(
        link.blocking_get_object(address),
        Err(LinkError::Permission(_))
    ));

    link.blocking_new_token().unwrap();
    assert!(matches!(
        link.blocking_get_object(address),
        Err(LinkError::Permission(_))
    ));
}

#[test]
fn static_state_is_set_once() {
    let (link, _transport) = connect();
    let handle = link
        .blocking_new_object(b"once", ObjectOptions::new().with_api_id(api("notes")))
        .unwrap();

    let result = handle.blocking_update(b"twice");
    assert!(matches!(result, Err(LinkError::InvalidState(_))));
    assert_eq!(handle.state().unwrap(), b"once".to_vec());
}

#[test]
fn deleted_handle_is_inert() {
    let (link, _transport) = connect();
    let handle = link.blocking_new_object(b"gone", dynamic_options()).unwrap();
    let address = handle.address().unwrap();

    link.blocking_delete(&handle).unwrap();

    assert!(matches!(handle.state(), Err(LinkError::InvalidState(_))));
    assert!(matches!(handle.address(), Err(LinkError::InvalidState(_))));
    assert!(matches!(handle.is_owned(), Err(LinkError::InvalidState(_))));
    assert!(matches!(
        handle.blocking_update(b"x"),
        Err(LinkError::InvalidState(_))
    ));
    assert!(matches!(
        handle.blocking_share(AgentId::random()),
        Err(LinkError::InvalidState(_))
    ));
    assert!(matches!(handle.blocking_discard(), Err(LinkError::InvalidState(_))));
    assert!(matches!(handle.blocking_delete(), Err(LinkError::InvalidState(_))));
    assert_eq!(handle.stage(), ObjectStage::Deleted);

    // The address does not bring the old instance back.
    assert!(matches!(
        link.blocking_get_object(address),
        Err(LinkError::NotFound(_))
    ));
}

#[test]
fn hold_on_remotely_deleted_object() {
    let (link, transport) = connect();
    let handle = link.blocking_new_object(b"x", dynamic_options()).unwrap();
    let address = handle.address().unwrap();

    // Deleted at the service but the push has not been observed yet.
    transport.push_delete(address);
    let result = handle.blocking_hold();
    assert!(matches!(
        result,
        Err(LinkError::NotFound(_)) | Err(LinkError::InvalidState(_))
    ));

    wait_until(|| handle.stage() == ObjectStage::Deleted);
    assert!(matches!(handle.blocking_hold(), Err(LinkError::InvalidState(_))));
}

// ===========================================
// Callback Scenarios
// ===========================================

#[test]
fn update_invokes_both_lists_once() {
    let (link, _transport) = connect();
    let handle = link.blocking_new_object(b"v1", dynamic_options()).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let expected = handle.address().unwrap();
    handle
        .append_blocking_callback(blocking_callback(move |h| {
            assert_eq!(h.address()?, expected);
            log.lock().unwrap().push(("blocking", h.state()?));
            Ok(())
        }))
        .unwrap();
    let log = seen.clone();
    handle
        .append_async_callback(async_callback(move |h| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(("async", h.state()?));
                Ok::<(), CallbackError>(())
            }
        }))
        .unwrap();

    handle.blocking_update(b"v2").unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![("blocking", b"v2".to_vec()), ("async", b"v2".to_vec())]
    );
}

#[test]
fn removing_unknown_callback_is_not_found() {
    let (link, _transport) = connect();
    let handle = link.blocking_new_object(b"v1", dynamic_options()).unwrap();
    let registered = blocking_callback(|_| Ok(()));
    let stranger = blocking_callback(|_| Ok(()));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let counting = blocking_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    handle.append_blocking_callback(registered.clone()).unwrap();
    handle.append_blocking_callback(counting).unwrap();

    let result = handle.remove_blocking_callback(&stranger);
    assert!(matches!(result, Err(LinkError::NotFound(_))));

    // The list is unchanged: the registered callbacks still run.
    handle.blocking_update(b"v2").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    handle.remove_blocking_callback(&registered).unwrap();
}

#[test]
fn pushed_updates_apply_in_order() {
    let (link, transport) = connect();
    let record = foreign_record(true, b"0");
    let address = record.address;
    transport.seed_object(record, None);
    let handle = link.blocking_get_object(address).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    handle
        .append_blocking_callback(blocking_callback(move |h| {
            // Slow consumer: the forwarder has to wait for queue space.
            std::thread::sleep(Duration::from_millis(2));
            log.lock().unwrap().push(h.state()?);
            Ok(())
        }))
        .unwrap();

    for i in 1..=20u8 {
        transport.push_update(address, Payload::from(vec![i]));
    }

    wait_until(|| seen.lock().unwrap().len() == 20);
    let expected: Vec<Vec<u8>> = (1..=20u8).map(|i| vec![i]).collect();
    assert_eq!(*seen.lock().unwrap(), expected);
    assert_eq!(handle.history().unwrap().len(), 3);
}

// ===========================================
// Share Scenarios
// ===========================================

#[test]
fn registered_handler_receives_share_once() {
    let (link, transport) = connect();
    link.blocking_new_token().unwrap();

    let record = foreign_record(false, b"gift");
    let address = record.address;
    let author = record.author;
    transport.seed_object(record, None);

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    link.blocking_register_api(
        api("notes"),
        ShareHandler::blocking(move |link, notice| {
            let handle = link.blocking_get_object(notice.address)?;
            tx.lock()
                .unwrap()
                .send((notice, handle.state()?))
                .map_err(|e| e.to_string())?;
            Ok(())
        }),
    )
    .unwrap();

    transport.push_share(address, api("notes"), author);

    let (notice, state) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(notice.address, address);
    assert_eq!(notice.author, author);
    assert_eq!(state, b"gift".to_vec());
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn cooperative_handler_uses_suspending_api() {
    let (link, transport) = connect();
    link.blocking_new_token().unwrap();

    let record = foreign_record(true, b"live");
    let address = record.address;
    transport.seed_object(record, None);

    let fetched = Arc::new(Mutex::new(None));
    let slot = fetched.clone();
    link.blocking_register_api(
        api("notes"),
        ShareHandler::cooperative(move |link, notice| {
            let slot = slot.clone();
            async move {
                let handle = link.get_object(notice.address).await?;
                *slot.lock().unwrap() = Some(handle);
                Ok::<(), CallbackError>(())
            }
        }),
    )
    .unwrap();

    transport.push_share(address, api("notes"), AgentId::random());

    wait_until(|| fetched.lock().unwrap().is_some());
    let handle = fetched.lock().unwrap().clone().unwrap();
    assert_eq!(handle, link.blocking_get_object(address).unwrap());
}

#[test]
fn unregistered_share_is_discarded() {
    let (link, transport) = connect();
    let address = Address::random();

    transport.push_share(address, api("unknown"), AgentId::random());

    wait_until(|| transport.count_op(OpCode::Discard) == 1);
    assert!(link.is_connected());
}

#[test]
fn share_round_trip() {
    let (link, transport) = connect();
    let handle = link.blocking_new_object(b"doc", dynamic_options()).unwrap();
    let friend = AgentId::random();

    link.blocking_share(&handle, friend).unwrap();
    handle.blocking_share(friend).unwrap();

    assert_eq!(transport.count_op(OpCode::Share), 2);
    assert_eq!(handle.stage(), ObjectStage::Dynamic);
}

// ===========================================
// Concurrency Scenarios
// ===========================================

#[test]
fn blocking_calls_from_two_threads() {
    let (link, _transport) = connect();
    let workers: Vec<_> = (0..2u8)
        .map(|worker| {
            let link = link.clone();
            std::thread::spawn(move || {
                let handle = link
                    .blocking_new_object(vec![worker], dynamic_options())
                    .unwrap();
                for i in 0..25u8 {
                    handle.blocking_update(vec![worker, i]).unwrap();
                }
                handle.state().unwrap()
            })
        })
        .collect();

    let states: Vec<Vec<u8>> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert_eq!(states, vec![vec![0, 24], vec![1, 24]]);
}

#[test]
fn suspending_api_inside_run() {
    let (link, transport) = connect();
    let inner = link.clone();

    let state = link
        .run(async move {
            inner.new_token().await?;
            let handle = inner.new_object(b"v1", dynamic_options()).await?;
            handle.update(b"v2").await?;
            let frozen = inner.freeze(&handle).await?;
            handle.hold().await?;
            frozen.state()
        })
        .unwrap()
        .unwrap();

    assert_eq!(state, b"v2".to_vec());
    assert_eq!(transport.count_op(OpCode::Hold), 1);
}

#[test]
fn handles_from_another_link_are_rejected() {
    let (first, _t1) = connect();
    let (second, _t2) = connect();
    let handle = first.blocking_new_object(b"x", dynamic_options()).unwrap();

    assert!(matches!(
        second.blocking_hold(&handle),
        Err(LinkError::InvalidRequest(_))
    ));
}

#[test]
fn pushes_queue_behind_an_update_in_flight() {
    let transport = MockTransport::new();
    let link = Link::connect_with_transport(
        LinkConfig::new("ws://mock")
            .with_thread_name("scenario")
            .with_call_timeout(Duration::from_secs(5)),
        Arc::new(transport.clone()),
    )
    .unwrap();
    let handle = link
        .blocking_new_object(b"v0", dynamic_options().with_legroom(1))
        .unwrap();
    let address = handle.address().unwrap();

    transport.stall_op(OpCode::Update);
    let updater = handle.clone();
    let update = std::thread::spawn(move || updater.blocking_update(b"mine"));
    wait_until(|| transport.count_op(OpCode::Update) == 1);

    // More pushes than the handle's queue holds, while its update waits.
    for i in 1..=3u8 {
        transport.push_update(address, Payload::from(vec![i]));
    }
    link.blocking_whoami().unwrap();

    transport.unstall_op(OpCode::Update);
    update.join().unwrap().unwrap();
    wait_until(|| handle.state().unwrap() == vec![3]);
    link.blocking_whoami().unwrap();
}
