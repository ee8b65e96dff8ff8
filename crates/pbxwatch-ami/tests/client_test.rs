//! Protocol client tests against a local listener standing in for the PBX.

use pbxwatch_ami::{
    run_bootstrap, AmiError, BootstrapPlan, ConnectOptions, ManagerClient, BOOTSTRAP_ACTIONS,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;

fn options(addr: std::net::SocketAddr) -> ConnectOptions {
    ConnectOptions {
        addr: addr.to_string(),
        username: "monitor".to_string(),
        secret: "s3cret".to_string(),
        connect_timeout: Duration::from_secs(2),
    }
}

/// Reads one blank-line-terminated frame as raw lines (terminators stripped).
async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.expect("read frame line");
        assert!(n > 0, "peer closed mid-frame");
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        if line.is_empty() {
            return lines;
        }
        lines.push(line);
    }
}

#[tokio::test]
async fn login_then_events_then_commands() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let pbx = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);

        let login = read_frame(&mut reader).await;
        assert_eq!(
            login,
            vec![
                "Action: Login",
                "Username: monitor",
                "Secret: s3cret",
                "Events: on"
            ]
        );

        write
            .write_all(
                b"Asterisk Call Manager/7.0.3\r\n\
                  Response: Success\r\nMessage: Authentication accepted\r\n\r\n\
                  Event: PeerStatus\r\nPeer: PJSIP/101\r\nPeerStatus: Reachable\r\n\r\n",
            )
            .await
            .unwrap();

        let command = read_frame(&mut reader).await;
        assert_eq!(command, vec!["Action: Hangup", "Channel: PJSIP/101-00000001"]);
        // Close the connection.
    });

    let client = ManagerClient::new();
    let mut stream = client.connect(&options(addr)).await.expect("connect");
    assert!(client.is_connected().await);

    let event = stream.next_event().await.unwrap().expect("one event");
    assert_eq!(event.event_type(), Some("PeerStatus"));
    assert_eq!(event.get("Peer"), "PJSIP/101");

    client
        .send_command("Hangup", &[("Channel", "PJSIP/101-00000001")])
        .await
        .expect("send");

    pbx.await.unwrap();
    assert!(stream.next_event().await.unwrap().is_none());

    client.disconnect().await;
    let err = client.send_command("Ping", &[]).await.unwrap_err();
    assert!(matches!(err, AmiError::NotConnected));
}

#[tokio::test]
async fn concurrent_commands_never_interleave() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    const SENDERS: usize = 32;

    let pbx = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, _write) = socket.into_split();
        let mut reader = BufReader::new(read);
        let _login = read_frame(&mut reader).await;

        let mut seen = Vec::new();
        for _ in 0..SENDERS {
            let frame = read_frame(&mut reader).await;
            assert_eq!(frame.len(), 3, "frame was interleaved: {frame:?}");
            assert_eq!(frame[0], "Action: Hangup");
            let channel = frame[1].strip_prefix("Channel: ").expect("channel line");
            let id = frame[2].strip_prefix("ActionID: ").expect("action id line");
            assert_eq!(channel, format!("PJSIP/{id}-00000001"));
            seen.push(id.to_string());
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), SENDERS);
    });

    let client = ManagerClient::new();
    let _stream = client.connect(&options(addr)).await.expect("connect");

    let mut handles = Vec::new();
    for i in 0..SENDERS {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let id = (100 + i).to_string();
            let channel = format!("PJSIP/{id}-00000001");
            client
                .send_command("Hangup", &[("Channel", channel.as_str()), ("ActionID", id.as_str())])
                .await
                .expect("send");
        }));
    }
    for handle in handles {
        handle.await.expect("sender should not panic");
    }

    pbx.await.unwrap();
}

#[tokio::test]
async fn bootstrap_sends_fixed_query_sequence() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let pbx = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, _write) = socket.into_split();
        let mut reader = BufReader::new(read);
        let _login = read_frame(&mut reader).await;

        let mut actions = Vec::new();
        for _ in 0..=BOOTSTRAP_ACTIONS.len() {
            let frame = read_frame(&mut reader).await;
            actions.push(frame[0].trim_start_matches("Action: ").to_string());
        }
        actions
    });

    let client = ManagerClient::new();
    let _stream = client.connect(&options(addr)).await.expect("connect");
    run_bootstrap(
        &client,
        BootstrapPlan {
            initial_delay: Duration::from_millis(1),
            contacts_retry_delay: Duration::from_millis(1),
        },
    )
    .await
    .expect("bootstrap");

    let actions = pbx.await.unwrap();
    let mut expected: Vec<String> = BOOTSTRAP_ACTIONS.iter().map(|a| a.to_string()).collect();
    expected.push("PJSIPShowContacts".to_string());
    assert_eq!(actions, expected);
}

#[tokio::test]
async fn connect_to_closed_port_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ManagerClient::new();
    let err = client.connect(&options(addr)).await.unwrap_err();
    assert!(matches!(err, AmiError::Connect(_) | AmiError::Timeout));
    assert!(!client.is_connected().await);
}
