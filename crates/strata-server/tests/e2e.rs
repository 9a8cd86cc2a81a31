//! End-to-end tests: a real server on a temporary socket with the memory
//! backend, driven through the client library.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strata_client::Connection;
use strata_ipc::{rgb, Cell, InputEvent, Key, OutputMode, WindowAttr};
use strata_server::backend::{MemoryBackend, MemoryHandle, TerminalBackend};
use strata_server::compositor::Compositor;
use strata_server::server;
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};

struct TestServer {
    path: PathBuf,
    handle: MemoryHandle,
    quit: broadcast::Sender<()>,
    stop_input: Arc<AtomicBool>,
    _dir: tempfile::TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop_input.store(true, Ordering::Relaxed);
        let _ = self.quit.send(());
    }
}

async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("strata.sock");

    let (mut backend, handle) = MemoryBackend::new(20, 10);
    let events_source = backend.events().unwrap();

    let (commands_tx, commands_rx) = mpsc::channel(1024);
    let (events_tx, events_rx) = mpsc::channel(256);
    let (quit_tx, _) = broadcast::channel(8);

    let compositor = Compositor::new(
        Box::new(backend),
        commands_rx,
        commands_tx.clone(),
        events_rx,
        quit_tx.clone(),
    );
    tokio::spawn(compositor.run());

    let listener = UnixListener::bind(&path).unwrap();
    tokio::spawn(server::serve(listener, commands_tx, quit_tx.clone(), 256));

    let stop_input = Arc::new(AtomicBool::new(false));
    tokio::task::spawn_blocking({
        let stop = Arc::clone(&stop_input);
        let quit = quit_tx.clone();
        move || server::input_loop(events_source, events_tx, stop, quit)
    });

    TestServer {
        path,
        handle,
        quit: quit_tx,
        stop_input,
        _dir: dir,
    }
}

async fn recv<T, F>(fut: F) -> T
where
    F: Future<Output = anyhow::Result<T>>,
{
    timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out waiting for server")
        .unwrap()
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread")]
async fn create_draw_render_over_socket() {
    let server = start_server().await;
    let mut client = Connection::connect_as(&server.path, 100).await.unwrap();

    let id = client
        .new_window(2, 3, 4, 2, WindowAttr::Normal)
        .await
        .unwrap();
    assert!(id >= 1);

    client
        .draw(id, 0, 0, Cell::new('A', rgb(200, 10, 10), 0))
        .await
        .unwrap();
    assert_eq!(recv(client.next_ack()).await, id);
    client.render(id).await.unwrap();
    assert_eq!(recv(client.next_ack()).await, id);

    wait_for(|| server.handle.cell(2, 3).glyph() == Some('A')).await;
    assert_eq!(server.handle.cell(2, 3).fg, rgb(200, 10, 10));
    // Nothing outside the window was touched.
    assert_eq!(server.handle.cell(3, 3), Cell::default());
    assert_eq!(server.handle.cell(2, 4), Cell::default());
}

#[tokio::test(flavor = "multi_thread")]
async fn mouse_focus_and_sticky_drag() {
    let server = start_server().await;
    let mut c1 = Connection::connect_as(&server.path, 200).await.unwrap();
    let mut c2 = Connection::connect_as(&server.path, 300).await.unwrap();

    let l1 = c1.new_window(0, 0, 10, 5, WindowAttr::Normal).await.unwrap();
    c1.draw_fill(l1, 10, 5, vec![Cell::new('a', 0, 0); 50])
        .await
        .unwrap();
    c1.render(l1).await.unwrap();
    let l2 = c2.new_window(5, 2, 10, 5, WindowAttr::Normal).await.unwrap();
    c2.draw_fill(l2, 10, 5, vec![Cell::new('b', 0, 0); 50])
        .await
        .unwrap();
    c2.render(l2).await.unwrap();

    // The younger window is selected and on top of the overlap.
    wait_for(|| server.handle.cell(6, 3).glyph() == Some('b')).await;

    // Click inside l1 only: the event goes to its owner in local
    // coordinates.
    server.handle.inject(InputEvent::Mouse {
        key: Key::MouseLeft,
        x: 1,
        y: 1,
    });
    let msg = recv(c1.next_event()).await;
    assert_eq!(msg.id, l1);
    assert_eq!(
        msg.event,
        InputEvent::Mouse {
            key: Key::MouseLeft,
            x: 1,
            y: 1,
        }
    );

    // The click re-focused l1: it rises above l2 on the focus render.
    wait_for(|| server.handle.cell(6, 3).glyph() == Some('a')).await;

    // The rest of the gesture stays pinned to l1 wherever the cursor goes.
    server.handle.inject(InputEvent::Mouse {
        key: Key::MouseLeft,
        x: 12,
        y: 1,
    });
    server.handle.inject(InputEvent::Mouse {
        key: Key::MouseRelease,
        x: 15,
        y: 1,
    });
    let msg = recv(c1.next_event()).await;
    assert_eq!(msg.id, l1);
    assert_eq!(
        msg.event,
        InputEvent::Mouse {
            key: Key::MouseLeft,
            x: 12,
            y: 1,
        }
    );
    let msg = recv(c1.next_event()).await;
    assert_eq!(msg.id, l1);
    assert_eq!(
        msg.event,
        InputEvent::Mouse {
            key: Key::MouseRelease,
            x: 15,
            y: 1,
        }
    );

    // Keyboard input follows the new selection.
    server.handle.inject(InputEvent::Key {
        key: Key::None,
        ch: 'k',
        modifier: 0,
    });
    let msg = recv(c1.next_event()).await;
    assert_eq!(msg.id, l1);
    assert_eq!(
        msg.event,
        InputEvent::Key {
            key: Key::None,
            ch: 'k',
            modifier: 0,
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_reaps_windows() {
    let server = start_server().await;
    let mut client = Connection::connect_as(&server.path, 400).await.unwrap();
    let a = client.new_window(0, 0, 2, 1, WindowAttr::Normal).await.unwrap();
    let b = client.new_window(3, 0, 2, 1, WindowAttr::Normal).await.unwrap();
    for (id, ch) in [(a, 'x'), (b, 'y')] {
        client.draw(id, 0, 0, Cell::new(ch, 0, 0)).await.unwrap();
        client.render(id).await.unwrap();
    }
    wait_for(|| {
        server.handle.cell(0, 0).glyph() == Some('x')
            && server.handle.cell(3, 0).glyph() == Some('y')
    })
    .await;

    // Closing the connection makes the handler synthesize a delete per
    // owned window; the delete renders wipe them off the screen.
    drop(client);
    wait_for(|| {
        server.handle.cell(0, 0) == Cell::default() && server.handle.cell(3, 0) == Cell::default()
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn screen_query_get_and_resize_events() {
    let server = start_server().await;
    let mut client = Connection::connect_as(&server.path, 500).await.unwrap();
    let id = client.new_window(0, 0, 3, 2, WindowAttr::Normal).await.unwrap();

    let (width, height, mode) = client.screen(id).await.unwrap();
    assert_eq!((width, height), (20, 10));
    assert_eq!(mode, OutputMode::Rgb);

    client
        .draw(id, 1, 1, Cell::new('G', rgb(3, 3, 3), 0))
        .await
        .unwrap();
    let cell = client.get(id, 1, 1).await.unwrap();
    assert_eq!(cell.glyph(), Some('G'));
    assert_eq!(cell.fg, rgb(3, 3, 3));

    server.handle.set_size(30, 12);
    server.handle.inject(InputEvent::Resize);
    let msg = recv(client.next_event()).await;
    assert_eq!(msg.event, InputEvent::Resize);
    let (width, height, _) = client.screen(id).await.unwrap();
    assert_eq!((width, height), (30, 12));
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_frame_is_dropped_not_fatal() {
    use strata_ipc::frame::{read_frame, write_frame};
    use strata_ipc::{Reply, Request, ServerMsg};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let server = start_server().await;
    let mut stream = tokio::net::UnixStream::connect(&server.path).await.unwrap();
    stream.write_all(&600u32.to_le_bytes()).await.unwrap();
    let mut ready = [0u8; 5];
    stream.read_exact(&mut ready).await.unwrap();
    assert_eq!(&ready, b"READY");

    // An unknown tag is logged and dropped; the connection survives.
    write_frame(&mut stream, &[0x7F, 1, 2, 3]).await.unwrap();

    let request = Request::NewWindow {
        pid: 600,
        x: 0,
        y: 0,
        width: 2,
        height: 2,
        attr: WindowAttr::Normal,
    };
    write_frame(&mut stream, &request.encode()).await.unwrap();
    let frame = timeout(Duration::from_secs(5), read_frame(&mut stream))
        .await
        .expect("timed out waiting for reply")
        .unwrap()
        .unwrap();
    match ServerMsg::decode(&frame).unwrap() {
        ServerMsg::Reply(Reply::Creation { id }) => assert!(id >= 1),
        other => panic!("unexpected message {other:?}"),
    }
}
