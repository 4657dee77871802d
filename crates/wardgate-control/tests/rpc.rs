//! Round trips through the TCP front end

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use wardgate_control::{RpcServer, CONTROL_PLANE_PEER_NAME};
use wardgate_proto::{
    AdminCredentials, ClientCodec, Code, DeviceConfigurationStatus, Request, Response,
};

type Client = Framed<TcpStream, ClientCodec>;

async fn start(plane: &common::TestControlPlane) -> (SocketAddr, CancellationToken) {
    let server = RpcServer::bind("127.0.0.1:0".parse().unwrap(), plane.api.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move { server.run(token).await });
    (addr, cancel)
}

async fn client(addr: SocketAddr) -> Client {
    Framed::new(TcpStream::connect(addr).await.unwrap(), ClientCodec::new())
}

async fn call(client: &mut Client, request: Request) -> Response {
    client.send(request).await.unwrap();
    timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out")
        .expect("connection closed")
        .unwrap()
}

#[tokio::test]
async fn test_enroll_login_and_stream_over_tcp() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let plane = common::setup_with(|c| c.new_devices_healthy = true).await;
    common::add_gateway(&plane.store, &common::gateway("gw-1", &["g1"], false)).await;
    let (addr, cancel) = start(&plane).await;
    let token = common::token("user-1", &["g1"]);

    let mut conn = client(addr).await;
    let enrollment = match call(
        &mut conn,
        Request::EnrollDevice {
            token: token.clone(),
            serial: "serial-1".to_string(),
            platform: "linux".to_string(),
            public_key: "device-key".to_string(),
        },
    )
    .await
    {
        Response::Enrollment(enrollment) => enrollment,
        other => panic!("unexpected response: {:?}", other),
    };
    assert_eq!(enrollment.device_ipv4, "10.255.24.2");
    assert_eq!(enrollment.control_plane.name, CONTROL_PLANE_PEER_NAME);
    assert_eq!(enrollment.control_plane.ipv4, "10.255.24.1");

    // Several unary calls share one connection
    let session = match call(
        &mut conn,
        Request::Login {
            token,
            serial: "serial-1".to_string(),
            platform: "linux".to_string(),
            version: "1.0.0".to_string(),
        },
    )
    .await
    {
        Response::Session(session) => session,
        other => panic!("unexpected response: {:?}", other),
    };

    let mut stream = client(addr).await;
    stream
        .send(Request::GetDeviceConfiguration {
            session_key: session.key.clone(),
        })
        .await
        .unwrap();
    match timeout(Duration::from_secs(5), stream.next()).await.unwrap() {
        Some(Ok(Response::DeviceConfiguration(config))) => {
            assert_eq!(config.status, DeviceConfigurationStatus::DeviceHealthy);
            assert_eq!(config.gateways.len(), 1);
            assert!(config.gateways[0].password_hash.is_empty());
        }
        other => panic!("unexpected frame: {:?}", other),
    }

    // Hanging up releases the device's stream slot
    drop(stream);
    let device_id = session.device.id;
    timeout(Duration::from_secs(5), async {
        while plane.api.device_triggers().exists(&device_id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("trigger was not released");

    cancel.cancel();
}

#[tokio::test]
async fn test_stream_with_bad_session_returns_error_frame() {
    let plane = common::setup().await;
    let (addr, cancel) = start(&plane).await;

    let mut conn = client(addr).await;
    match call(
        &mut conn,
        Request::GetDeviceConfiguration {
            session_key: "bogus".to_string(),
        },
    )
    .await
    {
        Response::Error(status) => assert_eq!(status.code, Code::Unauthenticated),
        other => panic!("unexpected response: {:?}", other),
    }
    assert!(timeout(Duration::from_secs(5), conn.next())
        .await
        .unwrap()
        .is_none());

    cancel.cancel();
}

#[tokio::test]
async fn test_admin_calls_over_tcp() {
    let plane = common::setup().await;
    let (addr, cancel) = start(&plane).await;
    let mut conn = client(addr).await;

    let bad = AdminCredentials {
        username: "admin".to_string(),
        password: "nope".to_string(),
    };
    match call(&mut conn, Request::ListGateways { credentials: bad }).await {
        Response::Error(status) => assert_eq!(status.code, Code::Unauthenticated),
        other => panic!("unexpected response: {:?}", other),
    }

    match call(
        &mut conn,
        Request::EnrollGateway {
            credentials: common::admin(),
            gateway: common::gateway("gw-1", &["g1"], false),
        },
    )
    .await
    {
        Response::Gateway(gateway) => {
            assert_eq!(gateway.name, "gw-1");
            assert!(gateway.password_hash.is_empty());
        }
        other => panic!("unexpected response: {:?}", other),
    }

    match call(
        &mut conn,
        Request::UpdateGateway {
            credentials: common::admin(),
            gateway: common::gateway("gw-missing", &["g1"], false),
        },
    )
    .await
    {
        Response::Error(status) => assert_eq!(status.code, Code::NotFound),
        other => panic!("unexpected response: {:?}", other),
    }

    match call(
        &mut conn,
        Request::ListGateways {
            credentials: common::admin(),
        },
    )
    .await
    {
        Response::Gateways(gateways) => assert_eq!(gateways.len(), 1),
        other => panic!("unexpected response: {:?}", other),
    }

    match call(
        &mut conn,
        Request::GrantPrivilegedAccess {
            credentials: common::admin(),
            gateway: "gw-1".to_string(),
            user_id: "user-1".to_string(),
            duration_secs: 0,
        },
    )
    .await
    {
        Response::Error(status) => assert_eq!(status.code, Code::InvalidArgument),
        other => panic!("unexpected response: {:?}", other),
    }

    cancel.cancel();
}

#[tokio::test]
async fn test_gateway_stream_over_tcp_rejects_duplicate() {
    let plane = common::setup().await;
    common::add_gateway(&plane.store, &common::gateway("gw-1", &["g1"], false)).await;
    let (addr, cancel) = start(&plane).await;

    let open = |addr| async move {
        let mut conn = client(addr).await;
        conn.send(Request::GetGatewayConfiguration {
            gateway: "gw-1".to_string(),
            password: common::GATEWAY_PASSWORD.to_string(),
        })
        .await
        .unwrap();
        let frame = timeout(Duration::from_secs(10), conn.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        (conn, frame)
    };

    let (_first, frame) = open(addr).await;
    assert!(matches!(frame, Response::GatewayConfiguration(_)));

    let (_second, frame) = open(addr).await;
    match frame {
        Response::Error(status) => assert_eq!(status.code, Code::Aborted),
        other => panic!("unexpected frame: {:?}", other),
    }

    cancel.cancel();
}
