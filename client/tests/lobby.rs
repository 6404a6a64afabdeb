use std::time::Duration;

use minesweeper_client::{
    ButtonKind, ClientEngine, ClientMessage, Engine, EngineCommand, FrameType, GameParams,
    GameState, LobbyClient, LobbySocket, Paced, PacedReceiver, Pos, ServerMessage, paced_channel,
};
use minesweeper_common::session::Session;
use minesweeper_server::{ServerHandle, config::LobbyConfig, open_with};
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

async fn open_lobby(client_limit: u32) -> ServerHandle {
    let config = LobbyConfig {
        port: 0,
        client_limit,
        ..LobbyConfig::default()
    };
    let figment = rocket::Config::figment().merge(("log_level", "off"));

    open_with(config, figment, Session::with_seed(7))
        .await
        .unwrap()
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let polled = timeout(WAIT, async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}

/// Next command, acknowledging any cells that arrive first.
async fn next_command(receiver: &mut PacedReceiver) -> (EngineCommand, usize) {
    let mut cells = 0;
    loop {
        match timeout(WAIT, receiver.next()).await.unwrap() {
            Some(Paced::Cell(delivery)) => {
                assert!(!delivery.cell().is_hidden() || delivery.cell().is_marked());
                cells += 1;
                delivery.ack();
            }
            Some(Paced::Command(command)) => return (command, cells),
            None => panic!("renderer channel closed"),
        }
    }
}

#[tokio::test]
async fn guests_follow_the_hosts_board() {
    let server = open_lobby(3).await;
    let base = server.base_url();

    let mut host = ClientEngine::connect(&base, "host").await.unwrap();
    let (host_sender, mut host_renderer) = paced_channel();
    host.set_channels(host_sender);
    eventually("host to be seated", || host.server_status().joined == 1).await;

    let mut guest = ClientEngine::connect(&base, "guest").await.unwrap();
    let (guest_sender, mut guest_renderer) = paced_channel();
    guest.set_channels(guest_sender);
    eventually("both players listed", || {
        host.server_status().player_names == ["host", "guest"]
            && guest.server_status().player_names == ["host", "guest"]
    })
    .await;

    // Only the host decides the board size
    guest.resize(GameParams {
        width: 4,
        height: 4,
        mines: 2,
    });
    host.resize(GameParams {
        width: 10,
        height: 10,
        mines: 10,
    });

    assert_eq!(next_command(&mut guest_renderer).await, (EngineCommand::Resize, 0));
    assert_eq!(next_command(&mut host_renderer).await, (EngineCommand::Resize, 0));
    let mirror = guest.mirror();
    assert_eq!((mirror.width, mirror.height, mirror.mines), (10, 10, 10));
    assert_eq!(mirror.state, GameState::Start);

    host.on_position_action(Pos::new(0, 0), ButtonKind::Primary);

    let mut delivered = 0;
    while delivered == 0 {
        match timeout(WAIT, guest_renderer.next()).await.unwrap() {
            Some(Paced::Cell(delivery)) => {
                assert!(!delivery.cell().is_hidden());
                delivered += 1;
                delivery.ack();
            }
            Some(Paced::Command(command)) => {
                assert_eq!(command, EngineCommand::AfterClickWin);
            }
            None => panic!("renderer channel closed"),
        }
    }

    eventually("guest to see the round running", || {
        matches!(guest.status().state, GameState::Running | GameState::Win)
    })
    .await;
    assert!(guest.status().revealed >= 1);
    assert_eq!(guest.status().max_mines, 10);

    // A restart from anyone resets every mirror
    guest.restart();
    let command = loop {
        match next_command(&mut guest_renderer).await.0 {
            EngineCommand::AfterClickWin => continue,
            command => break command,
        }
    };
    assert_eq!(command, EngineCommand::Restart);
    assert_eq!(guest.status().revealed, 0);
    assert_eq!(guest.status().state, GameState::Start);

    server.close().await.unwrap();
    assert_eq!(next_command(&mut guest_renderer).await.0, EngineCommand::GoBack);
    eventually("guest to notice", || !guest.is_connected()).await;
}

#[tokio::test]
async fn text_is_relayed_to_every_peer() {
    let server = open_lobby(3).await;
    let base = server.base_url();
    let ws_url = LobbyClient::new(&base).unwrap().websocket_url().unwrap();

    let host = ClientEngine::connect(&base, "host").await.unwrap();
    eventually("host to be seated", || host.server_status().joined == 1).await;

    let mut watcher = LobbySocket::connect(&ws_url, "watcher").await.unwrap();
    host.send_text("good luck");

    let text = timeout(WAIT, async {
        loop {
            let frame = watcher.receive_frame().await.unwrap().unwrap();
            if frame.kind == FrameType::Text {
                return ServerMessage::decode(&frame).unwrap();
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(text, ServerMessage::Text("good luck".to_string()));

    watcher
        .send_message(&ClientMessage::Text("thanks".to_string()))
        .unwrap();
    watcher.close().await.unwrap();
    eventually("watcher to leave", || host.server_status().joined == 1).await;

    server.close().await.unwrap();
}

#[tokio::test]
async fn full_or_locked_lobby_refuses_to_connect() {
    let server = open_lobby(1).await;
    let base = server.base_url();

    let host = ClientEngine::connect(&base, "host").await.unwrap();
    eventually("host to be seated", || host.server_status().joined == 1).await;

    let status = LobbyClient::new(&base).unwrap().socket_status().await.unwrap();
    assert!(!status.has_seat());
    assert!(ClientEngine::connect(&base, "late").await.is_err());

    server.disable_join();
    assert!(ClientEngine::connect(&base, "later").await.is_err());

    server.close().await.unwrap();
}

#[tokio::test]
async fn host_leaving_sends_everyone_back() {
    let server = open_lobby(3).await;
    let base = server.base_url();

    let host = ClientEngine::connect(&base, "host").await.unwrap();
    eventually("host to be seated", || host.server_status().joined == 1).await;

    let mut guest = ClientEngine::connect(&base, "guest").await.unwrap();
    let (sender, mut renderer) = paced_channel();
    guest.set_channels(sender);
    eventually("guest to be seated", || guest.server_status().joined == 2).await;

    host.disconnect().await;

    assert_eq!(next_command(&mut renderer).await.0, EngineCommand::GoBack);
    assert!(server.lobby().is_closed());
    server.wait().await.unwrap();
}

#[tokio::test]
async fn server_close_sends_guest_back() {
    let server = open_lobby(2).await;
    let base = server.base_url();

    let mut guest = ClientEngine::connect(&base, "guest").await.unwrap();
    let (sender, mut renderer) = paced_channel();
    guest.set_channels(sender);
    eventually("guest to be seated", || guest.server_status().joined == 1).await;

    server.close().await.unwrap();

    assert_eq!(
        timeout(WAIT, renderer.recv_command()).await.unwrap(),
        Some(EngineCommand::GoBack)
    );
    eventually("reader and dispatcher to stop", || !guest.is_connected()).await;
}
