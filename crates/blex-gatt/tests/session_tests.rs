//! End-to-end central/peripheral behavior over the loopback link, plus
//! central failure handling against a scripted transport.

mod common;

use std::sync::Arc;
use std::time::Duration;

use blex_core::{decode_advertisement, sig_uuid};
use blex_gatt::profiles::{battery, ping, radio, time};
use blex_gatt::{
    BatteryClient, BatteryServer, CentralSession, ConnectionState, ExactTime, GattConfig,
    GattError, GattStatus, LoopbackLink, NoopCallback, OperationKind, OperationTarget,
    PeerAddress, PingClient, PingServer, Profile, TimeClient, TimeServer,
};

use common::{next_message, recv, CentralEvent, MockTransport, RecordingCallback};

// ----------------------------------------------------------------------------
// Loopback
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_ping_round_trip() {
    let link = LoopbackLink::new();
    let server = PingServer::session(GattConfig::default(), link.peripheral_transport());
    link.bind_peripheral(server.event_sink());
    server.start().await.unwrap();

    let payload = link.advertisement().unwrap();
    assert!(payload.len() <= 31);
    let advertisement = decode_advertisement(&payload).unwrap();
    assert_eq!(advertisement.device_name.as_deref(), Some("blex"));
    assert_eq!(advertisement.flags, Some(0x06));

    let (callback, mut events) = RecordingCallback::new();
    let client = PingClient::new(link.central_transport(), callback);
    link.bind_central(client.session().event_sink());
    client
        .session()
        .connect(link.peripheral_address())
        .await
        .unwrap();

    let sent = client.send_ping().await.unwrap();
    assert_eq!(sent, "This is a Ping message#1 from MagicPingClient");
    assert_eq!(client.session().payload_size(), 509);

    let reply = next_message(&mut events).await;
    assert_eq!(reply, format!("ACK{{{}}}", sent).into_bytes());

    let sent = client.send_ping().await.unwrap();
    assert_eq!(sent, "This is a Ping message#2 from MagicPingClient");
    let reply = next_message(&mut events).await;
    assert_eq!(String::from_utf8(reply).unwrap(), format!("ACK{{{}}}", sent));

    client.close();
    assert_eq!(client.session().state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_long_ping_spans_packets() {
    let link = LoopbackLink::new();
    let server = PingServer::session(GattConfig::default(), link.peripheral_transport());
    link.bind_peripheral(server.event_sink());
    server.start().await.unwrap();

    let (callback, mut events) = RecordingCallback::new();
    let client = PingClient::new(link.central_transport(), callback);
    link.bind_central(client.session().event_sink());
    let session = client.session();
    session.connect(link.peripheral_address()).await.unwrap();

    // Larger than one 509-byte payload, so both directions are segmented.
    let message = "x".repeat(1500);
    session
        .write(ping::PING_SERVICE, ping::PING_CHARACTERISTIC, message.clone().into_bytes())
        .await
        .unwrap();

    let reply = next_message(&mut events).await;
    assert_eq!(String::from_utf8(reply).unwrap(), format!("ACK{{{}}}", message));
}

#[tokio::test]
async fn test_battery_levels_per_instance() {
    let link = LoopbackLink::new();
    let server = BatteryServer::session(GattConfig::default(), link.peripheral_transport());
    link.bind_peripheral(server.event_sink());
    server.start().await.unwrap();

    let client = BatteryClient::new(link.central_transport(), Arc::new(NoopCallback));
    link.bind_central(client.session().event_sink());
    client
        .session()
        .connect(link.peripheral_address())
        .await
        .unwrap();

    let level = client.read_battery_level().await.unwrap();
    assert!(level % 2 == 0 && (2..=100).contains(&level));

    let levels = client.read_battery_levels().await.unwrap();
    assert_eq!(levels.len(), 2);
    assert_eq!(levels[0].0, battery::DEFAULT_INSTANCE);
    assert_eq!(levels[0].1 % 2, 0);
    assert_eq!(levels[1].0, battery::BOX_INSTANCE);
    assert_eq!(levels[1].1 % 2, 1);
}

#[tokio::test]
async fn test_time_read_and_notification() {
    let link = LoopbackLink::new();
    let server = TimeServer::session(GattConfig::default(), link.peripheral_transport());
    link.bind_peripheral(server.event_sink());
    server.start().await.unwrap();

    let (callback, mut events) = RecordingCallback::new();
    let client = TimeClient::new(link.central_transport(), callback);
    link.bind_central(client.session().event_sink());
    client
        .session()
        .connect(link.peripheral_address())
        .await
        .unwrap();

    let now = client.read_current_time().await.unwrap();
    assert!(now.year >= 2024);
    assert!((1..=7).contains(&now.day_of_week));
    assert!(now.to_naive().is_some());

    // The client subscribed through the configuration descriptor after
    // discovery; the read above was queued behind that.
    assert_eq!(server.registered_peers(), vec![link.central_address()]);

    // Drain the read value before waiting for the notification.
    let _ = next_message(&mut events).await;

    let delivered = TimeServer::notify_time_change(&server, time::ADJUST_MANUAL)
        .await
        .unwrap();
    assert_eq!(delivered, 1);

    let notified = ExactTime::from_bytes(&next_message(&mut events).await).unwrap();
    assert_eq!(notified.adjust_reason, time::ADJUST_MANUAL);
}

#[tokio::test]
async fn test_radio_broadcast_reaches_connected_clients() {
    let link = LoopbackLink::new();
    let radio_server = blex_gatt::RadioServer::new();
    let server = radio_server.session(GattConfig::default(), link.peripheral_transport());
    link.bind_peripheral(server.event_sink());
    server.start().await.unwrap();

    let (callback, mut events) = RecordingCallback::new();
    let client = blex_gatt::RadioClient::new(link.central_transport(), callback);
    link.bind_central(client.session().event_sink());
    client
        .session()
        .connect(link.peripheral_address())
        .await
        .unwrap();
    // Queued behind discovery and both subscriptions.
    client.session().discover_services().await.unwrap();

    let delivered = server
        .notify_registered(
            radio::RADIO_SERVICE,
            radio::FM_ONE_CHARACTERISTIC,
            radio_server.fm_one_data(),
        )
        .await
        .unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(next_message(&mut events).await, b"FM one: message#1");
}

#[tokio::test]
async fn test_read_without_value_is_denied() {
    let link = LoopbackLink::new();
    let server = PingServer::session(GattConfig::default(), link.peripheral_transport());
    link.bind_peripheral(server.event_sink());
    server.start().await.unwrap();

    let client = PingClient::new(link.central_transport(), Arc::new(NoopCallback));
    link.bind_central(client.session().event_sink());
    let peer = link.peripheral_address();
    client.session().connect(peer).await.unwrap();

    let result = client
        .session()
        .read(ping::PING_SERVICE, ping::PING_CHARACTERISTIC)
        .await;
    assert_eq!(
        result,
        Err(GattError::OperationFailed {
            op: OperationKind::ReadCharacteristic,
            target: OperationTarget::Peer(peer),
            status: GattStatus::FAILURE,
        })
    );

    let missing = client.session().read(ping::PING_SERVICE, sig_uuid(0x2A00)).await;
    assert!(matches!(missing, Err(GattError::CharacteristicNotFound { .. })));
}

#[tokio::test]
async fn test_connect_refused_when_not_advertising() {
    let link = LoopbackLink::new();
    let server = PingServer::session(GattConfig::default(), link.peripheral_transport());
    link.bind_peripheral(server.event_sink());

    let (callback, mut events) = RecordingCallback::new();
    let client = PingClient::new(link.central_transport(), callback);
    link.bind_central(client.session().event_sink());

    let result = client.session().connect(link.peripheral_address()).await;
    assert!(matches!(
        result,
        Err(GattError::OperationFailed {
            op: OperationKind::Connect,
            status: GattStatus::ERROR,
            ..
        })
    ));
    assert_eq!(client.session().state(), ConnectionState::Disconnected);
    assert_eq!(recv(&mut events).await, CentralEvent::State(ConnectionState::Connecting));
    assert_eq!(recv(&mut events).await, CentralEvent::State(ConnectionState::Disconnected));
}

#[tokio::test]
async fn test_server_stop_disconnects_client() {
    let link = LoopbackLink::new();
    let server = PingServer::session(GattConfig::default(), link.peripheral_transport());
    link.bind_peripheral(server.event_sink());
    server.start().await.unwrap();

    let (callback, mut events) = RecordingCallback::new();
    let client = PingClient::new(link.central_transport(), callback);
    link.bind_central(client.session().event_sink());
    client
        .session()
        .connect(link.peripheral_address())
        .await
        .unwrap();

    server.stop();
    assert!(!server.is_started());
    loop {
        if recv(&mut events).await == CentralEvent::State(ConnectionState::Disconnected) {
            break;
        }
    }
    assert!(matches!(
        client.send_ping().await,
        Err(GattError::NotConnected)
    ));
}

// ----------------------------------------------------------------------------
// Scripted Transport
// ----------------------------------------------------------------------------

fn radio_peer() -> PeerAddress {
    PeerAddress::new([0xC1, 0x02, 0x03, 0x04, 0x05, 0x06])
}

async fn connected_radio(
    transport: MockTransport,
    config: GattConfig,
) -> (CentralSession, Arc<MockTransport>) {
    let transport = Arc::new(transport);
    let session = CentralSession::new(
        Profile::MagicRadio,
        config,
        transport.clone(),
        Arc::new(NoopCallback),
    );
    transport.bind(session.event_sink());
    session.connect(radio_peer()).await.unwrap();
    (session, transport)
}

#[tokio::test]
async fn test_auto_discovery_and_profile_setup() {
    let transport = MockTransport::new(radio_peer(), vec![radio::create_service()]);
    let (session, transport) = connected_radio(transport, GattConfig::default()).await;

    // Runs after the queued discovery job.
    session.discover_services().await.unwrap();
    assert_eq!(session.services().len(), 1);
    assert_eq!(transport.count("discover"), 2);
    assert_eq!(transport.count("subscribe"), 4);
    assert_eq!(transport.count("mtu"), 0);
}

#[tokio::test]
async fn test_write_aborts_on_first_failed_segment() {
    let transport = MockTransport::new(radio_peer(), vec![radio::create_service()]);
    transport.script_writes([GattStatus::SUCCESS, GattStatus::FAILURE]);
    let (session, transport) = connected_radio(transport, GattConfig::default()).await;

    let result = session
        .write(
            radio::RADIO_SERVICE,
            radio::FM_ONE_CHARACTERISTIC,
            vec![0xAB; 50],
        )
        .await;

    assert!(matches!(
        result,
        Err(GattError::OperationFailed {
            op: OperationKind::WriteCharacteristic,
            status: GattStatus::FAILURE,
            ..
        })
    ));
    assert_eq!(transport.count("write"), 2);

    // Empty writes never reach the transport.
    session
        .write(radio::RADIO_SERVICE, radio::FM_ONE_CHARACTERISTIC, Vec::new())
        .await
        .unwrap();
    assert_eq!(transport.count("write"), 2);
}

#[tokio::test]
async fn test_close_fails_in_flight_read() {
    let transport =
        MockTransport::new(radio_peer(), vec![radio::create_service()]).with_hanging_reads();
    let (session, transport) = connected_radio(transport, GattConfig::default()).await;

    let reader = session.clone();
    let read = tokio::spawn(async move {
        reader
            .read(radio::RADIO_SERVICE, radio::FM_TWO_CHARACTERISTIC)
            .await
    });

    let target = OperationTarget::Peer(radio_peer());
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.coordinator().snapshot(&target).current_operation
            != Some(OperationKind::ReadCharacteristic)
        {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    session.close();
    assert_eq!(read.await.unwrap(), Err(GattError::NotConnected));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(transport.count("disconnect"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_read_times_out() {
    let transport =
        MockTransport::new(radio_peer(), vec![radio::create_service()]).with_hanging_reads();
    let config = GattConfig::default().with_operation_timeout(Duration::from_secs(2));
    let (session, _transport) = connected_radio(transport, config).await;

    let result = session
        .read(radio::RADIO_SERVICE, radio::FM_ONE_CHARACTERISTIC)
        .await;
    assert_eq!(
        result,
        Err(GattError::OperationTimeout {
            op: OperationKind::ReadCharacteristic,
            target: OperationTarget::Peer(radio_peer()),
            characteristic: Some(radio::FM_ONE_CHARACTERISTIC),
            timeout_ms: 2000,
        })
    );

    // The session stays usable after a timeout.
    session.discover_services().await.unwrap();
}

#[tokio::test]
async fn test_operations_require_connection() {
    let transport = Arc::new(MockTransport::new(radio_peer(), Vec::new()));
    let session = CentralSession::new(
        Profile::MagicRadio,
        GattConfig::default(),
        transport.clone(),
        Arc::new(NoopCallback),
    );
    transport.bind(session.event_sink());

    assert_eq!(
        session
            .read(radio::RADIO_SERVICE, radio::FM_ONE_CHARACTERISTIC)
            .await,
        Err(GattError::NotConnected)
    );
    assert_eq!(session.request_mtu(185).await, Err(GattError::NotConnected));
    assert!(transport.calls().is_empty());
}
