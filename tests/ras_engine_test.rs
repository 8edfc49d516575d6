use std::{cell::RefCell, rc::Rc};

use bluetooth_ranging::{
    config::RangingConfig,
    core::{address::AddressWithType, shared_box::SharedBox},
    gatt::{
        att_database::{AttErrorCode, AttributeDatabase},
        channel::{DisconnectReason, GattClient},
        gatt_database::GattDatabase,
        ids::{AttHandle, RegistrationId, TransportIndex},
        mocks::mock_client::{MockAttBearer, MockClientEvents, MockGattClient},
    },
    ras::{
        characteristics::{register_ras_service, RasCharacteristic, RAS_NUM_HANDLES, RAS_SERVICE_UUID},
        RasEngine, RasError, RasSession,
    },
};
use tokio::sync::mpsc::UnboundedReceiver;
use utils::{drain, start_test};

mod utils;

const TCB_IDX: TransportIndex = TransportIndex(1);
const OTHER_TCB_IDX: TransportIndex = TransportIndex(2);
const PEER: AddressWithType = AddressWithType::public([1, 2, 3, 4, 5, 6]);
const DISCONNECT_REASON: DisconnectReason = DisconnectReason(0x13);

type ReadResult = Result<Vec<u8>, AttErrorCode>;
type Calls = Rc<RefCell<Vec<(&'static str, RasSession)>>>;

fn create_engine() -> SharedBox<RasEngine> {
    RasEngine::new(&RangingConfig::default())
}

fn create_local_database() -> Rc<dyn AttributeDatabase> {
    Rc::new(GattDatabase::new())
}

fn create_peer_database() -> Rc<dyn AttributeDatabase> {
    let db = Rc::new(GattDatabase::new());
    register_ras_service(db.as_ref(), 1).unwrap();
    db
}

fn create_client(
    tcb_idx: TransportIndex,
) -> (Rc<MockGattClient>, UnboundedReceiver<MockClientEvents>) {
    MockGattClient::new(tcb_idx, PEER, create_peer_database())
}

fn create_attached_session(
    engine: &RasEngine,
) -> (RasSession, Rc<MockGattClient>, UnboundedReceiver<MockClientEvents>) {
    let (client, mut rx) = create_client(TCB_IDX);
    let session = engine.create(create_local_database(), None).unwrap();
    engine.attach(session, Some(client.clone())).unwrap();
    drain(&mut rx);
    (session, client, rx)
}

fn recorder(calls: &Calls, label: &'static str) -> Rc<dyn Fn(&RasEngine, RasSession)> {
    let calls = calls.clone();
    Rc::new(move |_: &RasEngine, session: RasSession| calls.borrow_mut().push((label, session)))
}

#[test]
fn test_local_service_layout() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let db = Rc::new(GattDatabase::new());

        // act
        let session = engine.create(db.clone(), None).unwrap();

        // assert
        let local = engine.local_characteristics(session).unwrap();
        let service = local.service().unwrap();
        assert_eq!(service.uuid, RAS_SERVICE_UUID);
        assert!(local.is_complete());
        for kind in RasCharacteristic::ALL {
            let characteristic = local.get(kind).unwrap();
            assert_eq!(characteristic.uuid, kind.uuid());
            assert_eq!(local.ccc(kind).is_some(), kind.has_ccc());
        }
        assert_eq!(db.list_attributes().len(), RAS_NUM_HANDLES as usize);
    });
}

#[test]
fn test_registry_deduplicates_by_identity() {
    start_test(async move {
        let engine = create_engine();
        let db = create_local_database();

        let first = engine.create(db.clone(), None).unwrap();
        let second = engine.create(db.clone(), None).unwrap();

        assert_ne!(first, second);
        assert_eq!(engine.database_count(), 1);
        assert_eq!(db.services_by_uuid(None).len(), 1);
        assert_eq!(engine.local_characteristics(first), engine.local_characteristics(second));
    });
}

#[test]
fn test_registration_failure_creates_nothing() {
    start_test(async move {
        let engine = create_engine();
        let db: Rc<dyn AttributeDatabase> = Rc::new(GattDatabase::with_handle_limit(AttHandle(8)));

        let result = engine.create(db.clone(), None);

        assert!(matches!(result, Err(RasError::RegistrationFailed(_))));
        assert_eq!(engine.database_count(), 0);
        assert_eq!(engine.session_count(), 0);
        assert!(db.services_by_uuid(None).is_empty());
    });
}

#[test]
fn test_reference_discipline() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let session = engine.create(create_local_database(), None).unwrap();
        let destroyed = Rc::new(RefCell::new(0));
        engine
            .register_ready_observer(session, Rc::new(|_: &RasEngine, _: RasSession| {}), {
                let destroyed = destroyed.clone();
                Some(Box::new(move || *destroyed.borrow_mut() += 1))
            })
            .unwrap();

        // act
        assert!(engine.ref_session(session));
        assert!(engine.ref_session(session));
        assert!(engine.unref_session(session));
        assert!(engine.unref_session(session));

        // assert
        assert_eq!(engine.ref_count(session), Some(1));
        assert_eq!(*destroyed.borrow(), 0);
        assert!(engine.unref_session(session));
        assert_eq!(*destroyed.borrow(), 1);
        assert_eq!(engine.session_count(), 0);
        assert!(!engine.unref_session(session));
        assert_eq!(*destroyed.borrow(), 1);
    });
}

#[test]
fn test_attach_clones_client_and_discovers_remote() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let (client, mut rx) = create_client(TCB_IDX);
        let session =
            engine.create(create_local_database(), Some(client.database())).unwrap();

        // act
        engine.attach(session, Some(client.clone())).unwrap();

        // assert
        assert_eq!(
            drain(&mut rx),
            vec![
                MockClientEvents::Cloned,
                MockClientEvents::IdleRegistered(RegistrationId(1)),
                MockClientEvents::DisconnectRegistered(RegistrationId(1)),
            ]
        );
        assert!(engine.is_attached(session));
        assert_eq!(engine.active_sessions(), vec![session]);
        assert_eq!(client.live_handles(), 2);
        assert!(engine.remote_characteristics(session).unwrap().is_complete());
        assert_eq!(engine.get_att(session).unwrap().transport_index(), TCB_IDX);
    });
}

#[test]
fn test_attach_adopts_client_database() {
    start_test(async move {
        let engine = create_engine();
        let session = engine.create(create_local_database(), None).unwrap();
        assert!(engine.remote_characteristics(session).is_none());
        let (client, _rx) = create_client(TCB_IDX);

        engine.attach(session, Some(client)).unwrap();

        let remote = engine.remote_characteristics(session).unwrap();
        assert!(remote.is_complete());
        assert!(remote.value_handle(RasCharacteristic::RealTimeData).is_some());
    });
}

#[test]
fn test_discovery_is_idempotent() {
    start_test(async move {
        let engine = create_engine();
        let (client, _rx) = create_client(TCB_IDX);
        let session =
            engine.create(create_local_database(), Some(client.database())).unwrap();
        engine.attach(session, Some(client.clone())).unwrap();
        let first = engine.remote_characteristics(session).unwrap();

        assert!(engine.detach(session));
        engine.attach(session, Some(client)).unwrap();

        assert_eq!(engine.remote_characteristics(session).unwrap(), first);
    });
}

#[test]
fn test_second_client_rejected() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let (session, _client, _rx) = create_attached_session(&engine);
        let (other, mut other_rx) = create_client(OTHER_TCB_IDX);

        // act
        let result = engine.attach(session, Some(other.clone()));

        // assert
        assert!(matches!(result, Err(RasError::AlreadyAttached(s)) if s == session));
        assert!(drain(&mut other_rx).is_empty());
        assert_eq!(other.live_handles(), 1);
        assert_eq!(engine.get_client(session).unwrap().bearer().transport_index(), TCB_IDX);
        assert_eq!(engine.active_sessions(), vec![session]);
    });
}

#[test]
fn test_attach_fails_when_clone_fails() {
    start_test(async move {
        let engine = create_engine();
        let (client, mut rx) = create_client(TCB_IDX);
        client.set_fail_clone(true);
        let session = engine.create(create_local_database(), None).unwrap();

        let result = engine.attach(session, Some(client.clone()));

        assert!(matches!(result, Err(RasError::TransportUnavailable)));
        assert!(!engine.is_attached(session));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(client.idle_registrations(), 0);
    });
}

#[test]
fn test_attach_notifies_observers_in_order() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let calls = Calls::default();
        engine.register(Some(recorder(&calls, "first")), None).unwrap();
        engine.register(Some(recorder(&calls, "second")), None).unwrap();
        let (client, _rx) = create_client(TCB_IDX);
        let session = engine.create(create_local_database(), None).unwrap();

        // act
        engine.attach(session, Some(client)).unwrap();

        // assert
        assert_eq!(*calls.borrow(), vec![("first", session), ("second", session)]);
    });
}

#[test]
fn test_attach_without_client_notifies_nobody() {
    start_test(async move {
        let engine = create_engine();
        let calls = Calls::default();
        engine.register(Some(recorder(&calls, "attached")), Some(recorder(&calls, "detached")));
        let session = engine.create(create_local_database(), None).unwrap();

        engine.attach(session, None).unwrap();

        assert!(calls.borrow().is_empty());
        assert_eq!(engine.active_sessions(), vec![session]);
    });
}

#[test]
fn test_detach_releases_transport() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let calls = Calls::default();
        engine.register(None, Some(recorder(&calls, "detached"))).unwrap();
        let (session, client, mut rx) = create_attached_session(&engine);

        // act
        assert!(engine.detach(session));
        assert!(!engine.detach(session));

        // assert
        assert_eq!(
            drain(&mut rx),
            vec![
                MockClientEvents::IdleUnregistered(RegistrationId(1)),
                MockClientEvents::DisconnectUnregistered(RegistrationId(1)),
                MockClientEvents::Released,
            ]
        );
        assert_eq!(*calls.borrow(), vec![("detached", session)]);
        assert_eq!(client.live_handles(), 1);
        assert!(!engine.is_attached(session));
        assert!(!engine.has_directory());
        assert_eq!(engine.ref_count(session), Some(1));
    });
}

#[test]
fn test_unregistered_observer_not_notified() {
    start_test(async move {
        let engine = create_engine();
        let calls = Calls::default();
        let id = engine.register(Some(recorder(&calls, "attached")), None).unwrap();

        assert!(engine.unregister(id));
        assert!(!engine.unregister(id));
        create_attached_session(&engine);

        assert!(calls.borrow().is_empty());
        assert_eq!(engine.attachment_observer_count(), 0);
    });
}

#[test]
fn test_observer_unregistered_during_notification() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let calls = Calls::default();
        let second_id = Rc::new(RefCell::new(None));
        engine
            .register(
                Some({
                    let calls = calls.clone();
                    let second_id = second_id.clone();
                    Rc::new(move |engine: &RasEngine, session: RasSession| {
                        calls.borrow_mut().push(("first", session));
                        if let Some(id) = second_id.borrow_mut().take() {
                            engine.unregister(id);
                        }
                    })
                }),
                None,
            )
            .unwrap();
        *second_id.borrow_mut() = engine.register(Some(recorder(&calls, "second")), None);

        // act
        let (session, _client, _rx) = create_attached_session(&engine);

        // assert
        assert_eq!(*calls.borrow(), vec![("first", session)]);
        assert_eq!(engine.attachment_observer_count(), 1);
    });
}

#[test]
fn test_ready_observers_run_in_order_once_per_idle() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let (session, client, _rx) = create_attached_session(&engine);
        let calls = Calls::default();
        for label in ["a", "b", "c"] {
            engine.register_ready_observer(session, recorder(&calls, label), None).unwrap();
        }

        // act
        client.fire_idle();
        client.fire_idle();

        // assert
        assert_eq!(*calls.borrow(), vec![("a", session), ("b", session), ("c", session)]);
        assert_eq!(engine.ref_count(session), Some(1));
    });
}

#[test]
fn test_idle_without_ready_observers() {
    start_test(async move {
        let engine = create_engine();
        let (session, client, _rx) = create_attached_session(&engine);

        client.fire_idle();

        assert_eq!(engine.ref_count(session), Some(1));
        assert!(engine.is_attached(session));
    });
}

#[test]
fn test_ready_observers_not_run_after_destroy() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let (session, client, _rx) = create_attached_session(&engine);
        let calls = Calls::default();
        engine.register_ready_observer(session, recorder(&calls, "ready"), None).unwrap();

        // act
        assert!(engine.unref_session(session));
        client.fire_idle();

        // assert
        assert!(calls.borrow().is_empty());
        assert_eq!(client.idle_registrations(), 0);
        assert_eq!(engine.session_count(), 0);
    });
}

#[test]
fn test_ready_observer_may_drop_last_reference() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let (session, client, _rx) = create_attached_session(&engine);
        let calls = Calls::default();
        engine
            .register_ready_observer(
                session,
                {
                    let calls = calls.clone();
                    Rc::new(move |engine: &RasEngine, session: RasSession| {
                        calls.borrow_mut().push(("a", session));
                        engine.unref_session(session);
                    })
                },
                None,
            )
            .unwrap();
        engine.register_ready_observer(session, recorder(&calls, "b"), None).unwrap();

        // act
        client.fire_idle();

        // assert
        assert_eq!(*calls.borrow(), vec![("a", session), ("b", session)]);
        assert_eq!(engine.session_count(), 0);
        assert_eq!(client.live_handles(), 1);
    });
}

#[test]
fn test_unregister_ready_observer_runs_destroy() {
    start_test(async move {
        let engine = create_engine();
        let (session, client, _rx) = create_attached_session(&engine);
        let calls = Calls::default();
        let destroyed = Rc::new(RefCell::new(0));
        let id = engine
            .register_ready_observer(session, recorder(&calls, "ready"), {
                let destroyed = destroyed.clone();
                Some(Box::new(move || *destroyed.borrow_mut() += 1))
            })
            .unwrap();

        assert!(engine.unregister_ready_observer(session, id));
        assert!(!engine.unregister_ready_observer(session, id));
        client.fire_idle();

        assert_eq!(*destroyed.borrow(), 1);
        assert!(calls.borrow().is_empty());
        assert_eq!(engine.ready_observer_count(session), 0);
    });
}

#[test]
fn test_notifications_reach_subscriber() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let (session, client, mut rx) = create_attached_session(&engine);
        let handle =
            engine.remote_characteristics(session).unwrap().value_handle(RasCharacteristic::RealTimeData).unwrap();
        let received = Rc::new(RefCell::new(vec![]));

        // act
        engine
            .subscribe(session, handle, {
                let received = received.clone();
                Rc::new(move |_: &RasEngine, _: RasSession, handle: AttHandle, value: &[u8]| {
                    received.borrow_mut().push((handle, value.to_vec()))
                })
            })
            .unwrap();
        client.notify(handle, &[1, 2]);
        client.notify(handle, &[3]);

        // assert
        assert_eq!(
            drain(&mut rx),
            vec![MockClientEvents::NotifyRegistered(RegistrationId(2), handle)]
        );
        assert_eq!(*received.borrow(), vec![(handle, vec![1, 2]), (handle, vec![3])]);
        assert_eq!(engine.subscription_count(session), 1);
    });
}

#[test]
fn test_rejected_subscription() {
    start_test(async move {
        let engine = create_engine();
        let (session, client, _rx) = create_attached_session(&engine);
        client.set_reject_notify(true);

        let result = engine.subscribe(
            session,
            AttHandle(3),
            Rc::new(|_: &RasEngine, _: RasSession, _: AttHandle, _: &[u8]| {}),
        );

        assert!(matches!(result, Err(RasError::SubscriptionFailed)));
        assert_eq!(engine.subscription_count(session), 0);
    });
}

#[test]
fn test_failed_acknowledgement_keeps_subscription() {
    start_test(async move {
        let engine = create_engine();
        let (session, client, _rx) = create_attached_session(&engine);
        client.set_notify_ack(Err(AttErrorCode::WRITE_NOT_PERMITTED));

        let result = engine.subscribe(
            session,
            AttHandle(3),
            Rc::new(|_: &RasEngine, _: RasSession, _: AttHandle, _: &[u8]| {}),
        );

        assert!(result.is_ok());
        assert_eq!(client.notify_registrations(), 1);
    });
}

#[test]
fn test_unsubscribe_stops_notifications() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let (session, client, mut rx) = create_attached_session(&engine);
        let received = Rc::new(RefCell::new(0));
        let id = engine
            .subscribe(session, AttHandle(3), {
                let received = received.clone();
                Rc::new(move |_: &RasEngine, _: RasSession, _: AttHandle, _: &[u8]| {
                    *received.borrow_mut() += 1
                })
            })
            .unwrap();
        drain(&mut rx);

        // act
        assert!(engine.unsubscribe(session, id));
        assert!(!engine.unsubscribe(session, id));

        // assert
        assert_eq!(drain(&mut rx), vec![MockClientEvents::NotifyUnregistered(RegistrationId(2))]);
        assert_eq!(client.notify(AttHandle(3), &[0]), 0);
        assert_eq!(*received.borrow(), 0);
    });
}

#[test]
fn test_detach_drops_subscriptions() {
    start_test(async move {
        let engine = create_engine();
        let (session, client, _rx) = create_attached_session(&engine);
        for handle in [AttHandle(3), AttHandle(6)] {
            engine
                .subscribe(
                    session,
                    handle,
                    Rc::new(|_: &RasEngine, _: RasSession, _: AttHandle, _: &[u8]| {}),
                )
                .unwrap();
        }

        engine.detach(session);

        assert_eq!(client.notify_registrations(), 0);
        assert_eq!(engine.subscription_count(session), 0);
    });
}

#[test]
fn test_disconnect_detaches_once() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let calls = Calls::default();
        engine.register(None, Some(recorder(&calls, "detached"))).unwrap();
        let (session, client, _rx) = create_attached_session(&engine);

        // act
        client.mock_bearer().disconnect(DISCONNECT_REASON);

        // assert
        assert_eq!(*calls.borrow(), vec![("detached", session)]);
        assert!(!engine.is_attached(session));
        assert!(engine.active_sessions().is_empty());
        assert_eq!(client.idle_registrations(), 0);
        assert_eq!(engine.ref_count(session), Some(1));
    });
}

#[test]
fn test_session_for_transport() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let calls = Calls::default();
        engine
            .register(Some(recorder(&calls, "attached")), Some(recorder(&calls, "detached")))
            .unwrap();
        let local_db = create_local_database();
        let (bearer, mut rx) = MockAttBearer::new(TCB_IDX, PEER);

        // act
        let session = engine.session_for_transport(local_db.clone(), bearer.clone()).unwrap();
        let again = engine.session_for_transport(local_db, bearer.clone()).unwrap();

        // assert
        assert_eq!(session, again);
        assert_eq!(engine.lookup_by_transport(bearer.as_ref()), Some(session));
        assert_eq!(engine.get_att(session).unwrap().peer_address(), PEER);
        assert!(!engine.is_attached(session));
        assert_eq!(*calls.borrow(), vec![("attached", session)]);
        assert_eq!(drain(&mut rx), vec![MockClientEvents::DisconnectRegistered(RegistrationId(1))]);
    });
}

#[test]
fn test_server_session_released_on_disconnect() {
    start_test(async move {
        let engine = create_engine();
        let calls = Calls::default();
        engine.register(None, Some(recorder(&calls, "detached"))).unwrap();
        let (bearer, _rx) = MockAttBearer::new(TCB_IDX, PEER);
        let session = engine.session_for_transport(create_local_database(), bearer.clone()).unwrap();

        bearer.disconnect(DISCONNECT_REASON);

        assert_eq!(*calls.borrow(), vec![("detached", session)]);
        assert_eq!(engine.session_count(), 0);
        assert!(engine.lookup_by_transport(bearer.as_ref()).is_none());
    });
}

#[test]
fn test_client_attach_to_server_session_keeps_one_disconnect_registration() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let (client, _rx) = create_client(TCB_IDX);
        let bearer = client.mock_bearer();
        let session = engine.session_for_transport(create_local_database(), bearer.clone()).unwrap();

        // act
        engine.attach(session, Some(client.clone())).unwrap();
        let registrations_while_attached = bearer.disconnect_registrations();
        assert!(engine.detach(session));

        // assert
        assert_eq!(registrations_while_attached, 1);
        assert_eq!(bearer.disconnect_registrations(), 0);
        assert_eq!(engine.session_count(), 0);
    });
}

#[test]
fn test_disconnect_registration_released_on_issuing_bearer() {
    start_test(async move {
        // arrange: a server-side session, then a client over another bearer
        let engine = create_engine();
        let (server_bearer, _server_rx) = MockAttBearer::new(TCB_IDX, PEER);
        let session =
            engine.session_for_transport(create_local_database(), server_bearer.clone()).unwrap();
        let (client, _rx) = create_client(OTHER_TCB_IDX);
        engine.attach(session, Some(client.clone())).unwrap();

        // act
        engine.detach(session);

        // assert
        assert_eq!(server_bearer.disconnect_registrations(), 0);
        assert_eq!(client.mock_bearer().disconnect_registrations(), 0);
    });
}

#[test]
fn test_session_for_disconnected_transport() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let calls = Calls::default();
        engine.register(Some(recorder(&calls, "attached")), None).unwrap();
        let (bearer, _rx) = MockAttBearer::new(TCB_IDX, PEER);
        bearer.disconnect(DISCONNECT_REASON);

        // act
        let result = engine.session_for_transport(create_local_database(), bearer.clone());

        // assert
        assert!(matches!(result, Err(RasError::TransportUnavailable)));
        assert_eq!(engine.session_count(), 0);
        assert!(!engine.has_directory());
        assert!(engine.lookup_by_transport(bearer.as_ref()).is_none());
        assert!(calls.borrow().is_empty());
    });
}

#[test]
fn test_lookup_by_unknown_transport() {
    start_test(async move {
        let engine = create_engine();
        create_attached_session(&engine);
        let (bearer, _rx) = MockAttBearer::new(OTHER_TCB_IDX, PEER);

        assert!(engine.lookup_by_transport(bearer.as_ref()).is_none());
    });
}

#[test]
fn test_read_characteristic_completes() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let (session, client, mut rx) = create_attached_session(&engine);
        let result = Rc::new(RefCell::new(None));

        // act
        engine
            .read_characteristic(session, AttHandle(3), {
                let result = result.clone();
                Box::new(move |_: &RasEngine, _: RasSession, value: ReadResult| *result.borrow_mut() = Some(value))
            })
            .unwrap();
        assert_eq!(engine.pending_request_count(session), 1);
        assert!(client.complete_read(RegistrationId(2), Ok(vec![1, 0, 0, 0])));

        // assert
        assert_eq!(drain(&mut rx), vec![MockClientEvents::ReadIssued(RegistrationId(2), AttHandle(3))]);
        assert_eq!(*result.borrow(), Some(Ok(vec![1, 0, 0, 0])));
        assert_eq!(engine.pending_request_count(session), 0);
    });
}

#[test]
fn test_read_requires_client() {
    start_test(async move {
        let engine = create_engine();
        let session = engine.create(create_local_database(), None).unwrap();

        let result = engine.read_characteristic(
            session,
            AttHandle(3),
            Box::new(|_: &RasEngine, _: RasSession, _: ReadResult| {}),
        );

        assert!(matches!(result, Err(RasError::NotAttached(_))));
    });
}

#[test]
fn test_pending_read_survives_detach() {
    start_test(async move {
        let engine = create_engine();
        let (session, client, _rx) = create_attached_session(&engine);
        let completed = Rc::new(RefCell::new(false));
        engine
            .read_characteristic(session, AttHandle(3), {
                let completed = completed.clone();
                Box::new(move |_: &RasEngine, _: RasSession, _: ReadResult| *completed.borrow_mut() = true)
            })
            .unwrap();

        engine.detach(session);
        client.complete_read(RegistrationId(2), Err(AttErrorCode::UNLIKELY_ERROR));

        assert!(*completed.borrow());
    });
}

#[test]
fn test_pending_read_cancelled_on_destroy() {
    start_test(async move {
        // arrange
        let engine = create_engine();
        let (session, client, mut rx) = create_attached_session(&engine);
        let completed = Rc::new(RefCell::new(false));
        engine
            .read_characteristic(session, AttHandle(3), {
                let completed = completed.clone();
                Box::new(move |_: &RasEngine, _: RasSession, _: ReadResult| *completed.borrow_mut() = true)
            })
            .unwrap();
        drain(&mut rx);

        // act
        engine.unref_session(session);

        // assert
        assert!(drain(&mut rx).contains(&MockClientEvents::RequestCancelled(RegistrationId(2))));
        assert_eq!(client.pending_reads(), 0);
        assert!(!client.complete_read(RegistrationId(2), Ok(vec![])));
        assert!(!*completed.borrow());
        assert_eq!(client.live_handles(), 1);
    });
}

#[test]
fn test_transport_events_after_engine_dropped() {
    start_test(async move {
        let engine = create_engine();
        let (session, client, _rx) = create_attached_session(&engine);
        let calls = Calls::default();
        engine.register_ready_observer(session, recorder(&calls, "ready"), None).unwrap();

        drop(engine);
        client.fire_idle();
        client.mock_bearer().disconnect(DISCONNECT_REASON);

        assert!(calls.borrow().is_empty());
        assert_eq!(client.live_handles(), 1);
    });
}
