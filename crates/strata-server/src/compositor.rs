//! The compositor: sole owner and writer of all layer state.
//!
//! One task drains the shared command queue (client requests plus channel
//! registration) and the terminal input stream. Requests mutate layers and
//! re-render; input events are routed to clients by focus and hit-testing.

use std::collections::HashMap;

use anyhow::{Context, Result};
use strata_ipc::{ClientId, EventMsg, InputEvent, LayerId, Reply, Request, COLOR_DEFAULT};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::backend::TerminalBackend;
use crate::gesture::GestureTracker;
use crate::layer::Layer;
use crate::order::LayerOrder;

/// Work items consumed by the compositor task. All mutation of compositor
/// state, including the channel registry, goes through this queue.
pub enum Command {
    /// Register a client's reply and event channels. `attached` fires once
    /// the registration is live, so the handler can send `READY` knowing no
    /// request can beat it.
    Attach {
        client: ClientId,
        reply_tx: mpsc::Sender<Reply>,
        event_tx: mpsc::Sender<EventMsg>,
        attached: oneshot::Sender<()>,
    },
    /// Forget a client's channels.
    Detach { client: ClientId },
    /// One decoded request from a client (or the compositor itself, for
    /// focus-follows-click).
    Request { client: ClientId, request: Request },
}

/// Where a dispatched input event goes.
enum Destination {
    Broadcast,
    Client(ClientId),
}

pub struct Compositor {
    backend: Box<dyn TerminalBackend>,
    width: i32,
    height: i32,
    layers: LayerOrder,
    /// Focused layer id; 0 means no focus.
    selected: LayerId,
    /// Next id to issue. Monotonic, never reused; starts at 1 because 0 is
    /// the no-focus sentinel.
    next_id: LayerId,
    gesture: GestureTracker,
    reply_channels: HashMap<ClientId, mpsc::Sender<Reply>>,
    event_channels: HashMap<ClientId, mpsc::Sender<EventMsg>>,
    commands: mpsc::Receiver<Command>,
    /// Clone of the command queue sender for self-enqueued focus requests.
    loopback: mpsc::Sender<Command>,
    events: mpsc::Receiver<InputEvent>,
    quit: broadcast::Sender<()>,
}

impl Compositor {
    pub fn new(
        backend: Box<dyn TerminalBackend>,
        commands: mpsc::Receiver<Command>,
        loopback: mpsc::Sender<Command>,
        events: mpsc::Receiver<InputEvent>,
        quit: broadcast::Sender<()>,
    ) -> Self {
        let (width, height) = backend.size();
        Self {
            backend,
            width,
            height,
            layers: LayerOrder::new(),
            selected: 0,
            next_id: 1,
            gesture: GestureTracker::default(),
            reply_channels: HashMap::new(),
            event_channels: HashMap::new(),
            commands,
            loopback,
            events,
            quit,
        }
    }

    /// Main loop. Returns on quit or when every command sender is gone;
    /// returns an error only for terminal I/O failures, which are fatal to
    /// the whole server.
    pub async fn run(mut self) -> Result<()> {
        info!(width = self.width, height = self.height, "compositor running");
        let mut quit_rx = self.quit.subscribe();
        let result = loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => {
                        if let Err(e) = self.handle_command(cmd) {
                            break Err(e);
                        }
                    }
                    None => break Ok(()),
                },
                event = self.events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.dispatch_event(event) {
                            break Err(e);
                        }
                    }
                    None => break Ok(()),
                },
                _ = quit_rx.recv() => break Ok(()),
            }
        };
        // Fatal or not, take the rest of the server down with us.
        let _ = self.quit.send(());
        result
    }

    fn handle_command(&mut self, cmd: Command) -> Result<()> {
        match cmd {
            Command::Attach {
                client,
                reply_tx,
                event_tx,
                attached,
            } => {
                if self.reply_channels.insert(client, reply_tx).is_some() {
                    warn!(client, "replacing channels for reconnecting client");
                }
                self.event_channels.insert(client, event_tx);
                let _ = attached.send(());
                Ok(())
            }
            Command::Detach { client } => {
                self.drop_client(client);
                debug!(client, "client detached");
                Ok(())
            }
            Command::Request { client, request } => self.process_request(client, request),
        }
    }

    fn process_request(&mut self, client: ClientId, request: Request) -> Result<()> {
        match request {
            Request::NewWindow {
                pid,
                x,
                y,
                width,
                height,
                attr,
            } => {
                let id = self.next_id;
                self.next_id += 1;
                self.layers.push(Layer::new(id, pid, x, y, width, height, attr));
                // The new window takes focus, bottom-pinned ones included.
                self.selected = id;
                debug!(id, owner = pid, width, height, "window created");
                self.send_reply(pid, Reply::Creation { id });
                Ok(())
            }
            Request::Get { id, x, y } => {
                let Some(layer) = self.layers.get(id) else {
                    self.unknown(client, id, "get");
                    return Ok(());
                };
                let Some(cell) = layer.cell(x, y) else {
                    warn!(id, x, y, "get outside canvas, dropped");
                    return Ok(());
                };
                let owner = layer.owner;
                self.send_reply(owner, Reply::GetCell { cell });
                Ok(())
            }
            Request::Draw { id, x, y, cell } => {
                let Some(layer) = self.layers.get_mut(id) else {
                    self.unknown(client, id, "draw");
                    return Ok(());
                };
                layer.visible = false;
                let Some(target) = layer.cell_mut(x, y) else {
                    warn!(id, x, y, "draw outside canvas, dropped");
                    return Ok(());
                };
                *target = cell.over(*target);
                Ok(())
            }
            Request::DrawFill {
                id,
                width,
                height,
                cells,
            } => {
                let Some(layer) = self.layers.get_mut(id) else {
                    self.unknown(client, id, "draw_fill");
                    return Ok(());
                };
                layer.visible = false;
                if width != layer.width || height != layer.height {
                    warn!(
                        id,
                        width,
                        height,
                        layer_width = layer.width,
                        layer_height = layer.height,
                        "draw_fill dimension mismatch, dropped"
                    );
                    return Ok(());
                }
                layer.fill(cells);
                Ok(())
            }
            Request::Render { id } => {
                let Some(layer) = self.layers.get_mut(id) else {
                    self.unknown(client, id, "render");
                    return Ok(());
                };
                layer.visible = true;
                self.render()
            }
            Request::Resize { id, width, height } => {
                let Some(layer) = self.layers.get_mut(id) else {
                    self.unknown(client, id, "resize");
                    return Ok(());
                };
                layer.visible = false;
                layer.resize(width, height);
                Ok(())
            }
            Request::Move { id, dx, dy } => {
                let Some(layer) = self.layers.get_mut(id) else {
                    self.unknown(client, id, "move");
                    return Ok(());
                };
                layer.visible = false;
                layer.x += dx;
                layer.y += dy;
                Ok(())
            }
            Request::Focus { id } => {
                if !self.layers.contains(id) {
                    self.unknown(client, id, "focus");
                    return Ok(());
                }
                self.layers.raise(id);
                self.selected = id;
                self.render()
            }
            Request::Unfocus { id } => {
                if self.selected == id {
                    self.selected = 0;
                }
                Ok(())
            }
            Request::Delete { id } => {
                let Some((_, behind)) = self.layers.remove(id) else {
                    self.unknown(client, id, "delete");
                    return Ok(());
                };
                if self.selected == id {
                    self.selected = behind.unwrap_or(0);
                }
                debug!(id, selected = self.selected, "window deleted");
                self.render()
            }
            Request::Screen { id } => {
                let Some(layer) = self.layers.get(id) else {
                    self.unknown(client, id, "screen");
                    return Ok(());
                };
                let owner = layer.owner;
                let reply = Reply::Screen {
                    width: self.width,
                    height: self.height,
                    mode: self.backend.output_mode(),
                };
                self.send_reply(owner, reply);
                Ok(())
            }
        }
    }

    /// Full-screen composite: clear, then blend every visible layer
    /// back-to-front so the front-most layer lands on top.
    fn render(&mut self) -> Result<()> {
        self.backend.clear(COLOR_DEFAULT, COLOR_DEFAULT);
        for layer in self.layers.iter_back_to_front() {
            if !layer.visible {
                continue;
            }
            for lx in 0..layer.width {
                for ly in 0..layer.height {
                    let rx = lx + layer.x;
                    let ry = ly + layer.y;
                    if rx < 0 || rx >= self.width || ry < 0 || ry >= self.height {
                        continue;
                    }
                    let under = self.backend.get_cell(rx, ry);
                    let cell = layer.cell(lx, ly).unwrap_or_default();
                    self.backend.set_cell(rx, ry, cell.over(under));
                }
            }
        }
        self.backend.flush().context("terminal flush failed")
    }

    /// Route one terminal input event to clients.
    fn dispatch_event(&mut self, event: InputEvent) -> Result<()> {
        let (dest, msg) = match event {
            InputEvent::None => return Ok(()),
            InputEvent::Resize => {
                let (width, height) = self.backend.size();
                self.width = width;
                self.height = height;
                info!(width, height, "terminal resized");
                (
                    Destination::Broadcast,
                    EventMsg {
                        id: self.selected,
                        event,
                    },
                )
            }
            InputEvent::Interrupt => (
                Destination::Broadcast,
                EventMsg {
                    id: self.selected,
                    event,
                },
            ),
            InputEvent::Key { .. } => {
                if self.selected == 0 {
                    return Ok(());
                }
                let Some(layer) = self.layers.get(self.selected) else {
                    return Ok(());
                };
                (
                    Destination::Client(layer.owner),
                    EventMsg {
                        id: self.selected,
                        event,
                    },
                )
            }
            InputEvent::Mouse { key, x, y } => {
                // A gesture in progress stays pinned to the layer it
                // started on; otherwise hit-test front to back.
                let (owner, id, local_x, local_y) = if self.gesture.continues(&event) {
                    self.gesture.target(x, y)
                } else {
                    self.hit_test(x, y).unwrap_or((0, 0, 0, 0))
                };
                self.gesture.save(owner, key, id, x, y, local_x, local_y);
                if id == 0 {
                    return Ok(());
                }
                if id != self.selected {
                    // Focus follows the click on the next queue pump.
                    let _ = self.loopback.try_send(Command::Request {
                        client: owner,
                        request: Request::Focus { id },
                    });
                }
                (
                    Destination::Client(owner),
                    EventMsg {
                        id,
                        event: InputEvent::Mouse {
                            key,
                            x: local_x,
                            y: local_y,
                        },
                    },
                )
            }
        };

        match dest {
            Destination::Broadcast => self.broadcast(msg),
            Destination::Client(client) => self.send_event(client, msg),
        }
        Ok(())
    }

    /// Topmost layer containing the point, with layer-local coordinates.
    fn hit_test(&self, x: i32, y: i32) -> Option<(ClientId, LayerId, i32, i32)> {
        self.layers
            .iter_front_to_back()
            .find(|layer| layer.contains(x, y))
            .map(|layer| (layer.owner, layer.id, x - layer.x, y - layer.y))
    }

    fn send_reply(&mut self, client: ClientId, reply: Reply) {
        let Some(tx) = self.reply_channels.get(&client) else {
            debug!(client, "reply for unregistered client dropped");
            return;
        };
        if tx.try_send(reply).is_err() {
            warn!(client, "reply channel stalled, dropping client");
            self.drop_client(client);
        }
    }

    fn send_event(&mut self, client: ClientId, msg: EventMsg) {
        let Some(tx) = self.event_channels.get(&client) else {
            debug!(client, "event for unregistered client dropped");
            return;
        };
        if tx.try_send(msg).is_err() {
            warn!(client, "event channel stalled, dropping client");
            self.drop_client(client);
        }
    }

    fn broadcast(&mut self, msg: EventMsg) {
        let stalled: Vec<ClientId> = self
            .event_channels
            .iter()
            .filter(|(_, tx)| tx.try_send(msg).is_err())
            .map(|(&client, _)| client)
            .collect();
        for client in stalled {
            warn!(client, "event channel stalled, dropping client");
            self.drop_client(client);
        }
    }

    /// Closing a client's channels is the disconnect signal its handler
    /// observes.
    fn drop_client(&mut self, client: ClientId) {
        self.reply_channels.remove(&client);
        self.event_channels.remove(&client);
    }

    fn unknown(&self, client: ClientId, id: LayerId, op: &'static str) {
        debug!(client, id, op, "request for unknown layer dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, MemoryHandle};
    use strata_ipc::{rgb, Cell, Key, WindowAttr};

    struct Fixture {
        compositor: Compositor,
        handle: MemoryHandle,
        loopback_rx: mpsc::Receiver<Command>,
    }

    fn fixture(width: i32, height: i32) -> Fixture {
        let (backend, handle) = MemoryBackend::new(width, height);
        let (loopback_tx, loopback_rx) = mpsc::channel(64);
        let (_commands_tx, commands_rx) = mpsc::channel(64);
        let (_events_tx, events_rx) = mpsc::channel(64);
        let (quit_tx, _) = broadcast::channel(1);
        let compositor = Compositor::new(
            Box::new(backend),
            commands_rx,
            loopback_tx,
            events_rx,
            quit_tx,
        );
        Fixture {
            compositor,
            handle,
            loopback_rx,
        }
    }

    struct TestClient {
        id: ClientId,
        replies: mpsc::Receiver<Reply>,
        events: mpsc::Receiver<EventMsg>,
    }

    fn attach(compositor: &mut Compositor, client: ClientId) -> TestClient {
        let (reply_tx, replies) = mpsc::channel(64);
        let (event_tx, events) = mpsc::channel(64);
        let (attached, _) = oneshot::channel();
        compositor
            .handle_command(Command::Attach {
                client,
                reply_tx,
                event_tx,
                attached,
            })
            .unwrap();
        TestClient {
            id: client,
            replies,
            events,
        }
    }

    fn create_window(
        compositor: &mut Compositor,
        client: &mut TestClient,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        attr: WindowAttr,
    ) -> LayerId {
        compositor
            .process_request(
                client.id,
                Request::NewWindow {
                    pid: client.id,
                    x,
                    y,
                    width,
                    height,
                    attr,
                },
            )
            .unwrap();
        match client.replies.try_recv().unwrap() {
            Reply::Creation { id } => id,
            other => panic!("expected creation reply, got {other:?}"),
        }
    }

    fn request(compositor: &mut Compositor, client: ClientId, request: Request) {
        compositor.process_request(client, request).unwrap();
    }

    #[test]
    fn create_draw_render_lands_on_screen() {
        let mut fx = fixture(20, 10);
        let mut client = attach(&mut fx.compositor, 100);
        let id = create_window(&mut fx.compositor, &mut client, 2, 3, 4, 2, WindowAttr::Normal);
        assert_eq!(id, 1);
        assert_eq!(fx.compositor.selected, id);

        request(
            &mut fx.compositor,
            client.id,
            Request::Draw {
                id,
                x: 0,
                y: 0,
                cell: Cell::new('A', rgb(255, 0, 0), COLOR_DEFAULT),
            },
        );
        // Drawing marks the layer invisible until the next render request.
        assert!(!fx.compositor.layers.get(id).unwrap().visible);

        request(&mut fx.compositor, client.id, Request::Render { id });
        assert_eq!(fx.handle.cell(2, 3).glyph(), Some('A'));
        assert_eq!(fx.handle.cell(2, 3).fg, rgb(255, 0, 0));
        // Nothing else was touched.
        assert_eq!(fx.handle.cell(3, 3), Cell::default());
        assert_eq!(fx.handle.cell(2, 4), Cell::default());
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut fx = fixture(20, 10);
        let mut client = attach(&mut fx.compositor, 100);
        let a = create_window(&mut fx.compositor, &mut client, 0, 0, 1, 1, WindowAttr::Normal);
        let b = create_window(&mut fx.compositor, &mut client, 0, 0, 1, 1, WindowAttr::Normal);
        request(&mut fx.compositor, client.id, Request::Delete { id: b });
        let c = create_window(&mut fx.compositor, &mut client, 0, 0, 1, 1, WindowAttr::Normal);
        assert!(a < b && b < c);
    }

    #[test]
    fn overlap_blends_back_to_front() {
        let mut fx = fixture(20, 10);
        let mut client = attach(&mut fx.compositor, 100);
        let below = create_window(&mut fx.compositor, &mut client, 0, 0, 3, 1, WindowAttr::Normal);
        let above = create_window(&mut fx.compositor, &mut client, 1, 0, 3, 1, WindowAttr::Normal);

        for x in 0..3 {
            request(
                &mut fx.compositor,
                client.id,
                Request::Draw {
                    id: below,
                    x,
                    y: 0,
                    cell: Cell::new('b', rgb(1, 1, 1), rgb(2, 2, 2)),
                },
            );
        }
        // The upper layer has a glyph only in its first column; elsewhere it
        // declares just a background.
        request(
            &mut fx.compositor,
            client.id,
            Request::Draw {
                id: above,
                x: 0,
                y: 0,
                cell: Cell::new('t', rgb(9, 9, 9), COLOR_DEFAULT),
            },
        );
        request(
            &mut fx.compositor,
            client.id,
            Request::Draw {
                id: above,
                x: 1,
                y: 0,
                cell: Cell {
                    ch: 0,
                    fg: COLOR_DEFAULT,
                    bg: rgb(7, 7, 7),
                    attr: 0,
                },
            },
        );
        request(&mut fx.compositor, client.id, Request::Render { id: below });
        request(&mut fx.compositor, client.id, Request::Render { id: above });

        // (1,0): both layers present; the upper glyph wins.
        let cell = fx.handle.cell(1, 0);
        assert_eq!(cell.glyph(), Some('t'));
        assert_eq!(cell.fg, rgb(9, 9, 9));
        // The upper cell is transparent there, so the lower glyph and colors
        // show through under the new background.
        let cell = fx.handle.cell(2, 0);
        assert_eq!(cell.glyph(), Some('b'));
        assert_eq!(cell.bg, rgb(7, 7, 7));
        // (0,0): only the lower layer.
        assert_eq!(fx.handle.cell(0, 0).glyph(), Some('b'));
    }

    #[test]
    fn negative_position_clips_to_screen() {
        let mut fx = fixture(5, 5);
        let mut client = attach(&mut fx.compositor, 100);
        let id = create_window(&mut fx.compositor, &mut client, -1, -1, 3, 3, WindowAttr::Normal);
        for x in 0..3 {
            for y in 0..3 {
                request(
                    &mut fx.compositor,
                    client.id,
                    Request::Draw {
                        id,
                        x,
                        y,
                        cell: Cell::new('#', 0, 0),
                    },
                );
            }
        }
        request(&mut fx.compositor, client.id, Request::Render { id });
        // Only the in-screen quadrant was written.
        assert_eq!(fx.handle.cell(0, 0).glyph(), Some('#'));
        assert_eq!(fx.handle.cell(1, 1).glyph(), Some('#'));
        assert_eq!(fx.handle.cell(2, 2), Cell::default());
    }

    #[test]
    fn mouse_hit_focuses_and_rewrites_coordinates() {
        let mut fx = fixture(20, 10);
        let mut c1 = attach(&mut fx.compositor, 200);
        let mut c2 = attach(&mut fx.compositor, 300);
        let l1 = create_window(&mut fx.compositor, &mut c1, 0, 0, 10, 5, WindowAttr::Normal);
        let l2 = create_window(&mut fx.compositor, &mut c2, 5, 2, 10, 5, WindowAttr::Normal);
        assert_eq!(fx.compositor.selected, l2);

        fx.compositor
            .dispatch_event(InputEvent::Mouse {
                key: Key::MouseLeft,
                x: 1,
                y: 1,
            })
            .unwrap();

        let msg = c1.events.try_recv().unwrap();
        assert_eq!(msg.id, l1);
        assert_eq!(
            msg.event,
            InputEvent::Mouse {
                key: Key::MouseLeft,
                x: 1,
                y: 1,
            }
        );
        assert!(c2.events.try_recv().is_err());

        // Focus was enqueued for the next pump, not applied inline.
        let cmd = fx.loopback_rx.try_recv().unwrap();
        match &cmd {
            Command::Request {
                request: Request::Focus { id },
                ..
            } => assert_eq!(*id, l1),
            _ => panic!("expected focus request"),
        }
        fx.compositor.handle_command(cmd).unwrap();
        assert_eq!(fx.compositor.selected, l1);
        let front: Vec<LayerId> = fx
            .compositor
            .layers
            .iter_front_to_back()
            .map(|l| l.id)
            .collect();
        assert_eq!(front, vec![l1, l2]);
    }

    #[test]
    fn drag_stays_on_gesture_layer() {
        let mut fx = fixture(20, 10);
        let mut c1 = attach(&mut fx.compositor, 200);
        let mut c2 = attach(&mut fx.compositor, 300);
        let l1 = create_window(&mut fx.compositor, &mut c1, 0, 0, 10, 5, WindowAttr::Normal);
        let _l2 = create_window(&mut fx.compositor, &mut c2, 5, 2, 10, 5, WindowAttr::Normal);

        let positions = [(1, 1), (12, 1), (15, 1)];
        let keys = [Key::MouseLeft, Key::MouseLeft, Key::MouseRelease];
        for ((x, y), key) in positions.into_iter().zip(keys) {
            fx.compositor
                .dispatch_event(InputEvent::Mouse { key, x, y })
                .unwrap();
        }

        // Every event of the gesture lands on the press-target layer with
        // coordinates relative to it, even though the cursor crossed into
        // the other window.
        for ((x, y), key) in positions.into_iter().zip(keys) {
            let msg = c1.events.try_recv().unwrap();
            assert_eq!(msg.id, l1);
            assert_eq!(msg.event, InputEvent::Mouse { key, x, y });
        }
        assert!(c2.events.try_recv().is_err());
    }

    #[test]
    fn mouse_miss_is_dropped_but_remembered() {
        let mut fx = fixture(20, 10);
        let mut c1 = attach(&mut fx.compositor, 200);
        let _id = create_window(&mut fx.compositor, &mut c1, 0, 0, 3, 3, WindowAttr::Normal);

        // Press on empty space: no event, and the drag that follows stays
        // nowhere even when it crosses the window.
        fx.compositor
            .dispatch_event(InputEvent::Mouse {
                key: Key::MouseLeft,
                x: 10,
                y: 9,
            })
            .unwrap();
        fx.compositor
            .dispatch_event(InputEvent::Mouse {
                key: Key::MouseLeft,
                x: 1,
                y: 1,
            })
            .unwrap();
        assert!(c1.events.try_recv().is_err());
    }

    #[test]
    fn keys_go_to_selected_owner_only() {
        let mut fx = fixture(20, 10);
        let mut c1 = attach(&mut fx.compositor, 200);
        let mut c2 = attach(&mut fx.compositor, 300);
        let _l1 = create_window(&mut fx.compositor, &mut c1, 0, 0, 4, 4, WindowAttr::Normal);
        let l2 = create_window(&mut fx.compositor, &mut c2, 4, 0, 4, 4, WindowAttr::Normal);

        let key = InputEvent::Key {
            key: Key::None,
            ch: 'q',
            modifier: 0,
        };
        fx.compositor.dispatch_event(key).unwrap();
        let msg = c2.events.try_recv().unwrap();
        assert_eq!(msg.id, l2);
        assert!(c1.events.try_recv().is_err());

        // No focus, no delivery.
        request(&mut fx.compositor, c2.id, Request::Unfocus { id: l2 });
        assert_eq!(fx.compositor.selected, 0);
        fx.compositor.dispatch_event(key).unwrap();
        assert!(c2.events.try_recv().is_err());
    }

    #[test]
    fn resize_updates_size_and_broadcasts() {
        let mut fx = fixture(20, 10);
        let mut c1 = attach(&mut fx.compositor, 200);
        let mut c2 = attach(&mut fx.compositor, 300);
        let l1 = create_window(&mut fx.compositor, &mut c1, 0, 0, 4, 4, WindowAttr::Normal);

        fx.handle.set_size(30, 12);
        fx.compositor.dispatch_event(InputEvent::Resize).unwrap();
        assert_eq!((fx.compositor.width, fx.compositor.height), (30, 12));

        for client in [&mut c1, &mut c2] {
            let msg = client.events.try_recv().unwrap();
            assert_eq!(msg.id, l1);
            assert_eq!(msg.event, InputEvent::Resize);
        }
    }

    #[test]
    fn bottom_layer_renders_under_focused_normal() {
        let mut fx = fixture(10, 5);
        let mut client = attach(&mut fx.compositor, 100);
        let bottom = create_window(&mut fx.compositor, &mut client, 0, 0, 2, 1, WindowAttr::Bottom);
        let normal = create_window(&mut fx.compositor, &mut client, 0, 0, 2, 1, WindowAttr::Normal);

        request(
            &mut fx.compositor,
            client.id,
            Request::Draw {
                id: bottom,
                x: 0,
                y: 0,
                cell: Cell::new('B', 0, 0),
            },
        );
        request(
            &mut fx.compositor,
            client.id,
            Request::Draw {
                id: normal,
                x: 0,
                y: 0,
                cell: Cell::new('N', 0, 0),
            },
        );
        request(&mut fx.compositor, client.id, Request::Render { id: bottom });
        request(&mut fx.compositor, client.id, Request::Render { id: normal });
        assert_eq!(fx.handle.cell(0, 0).glyph(), Some('N'));

        // Focusing the pinned layer selects it but keeps it visually at the
        // bottom.
        request(&mut fx.compositor, client.id, Request::Focus { id: bottom });
        assert_eq!(fx.compositor.selected, bottom);
        assert_eq!(fx.handle.cell(0, 0).glyph(), Some('N'));
    }

    #[test]
    fn resize_request_discards_canvas_and_visibility() {
        let mut fx = fixture(20, 10);
        let mut client = attach(&mut fx.compositor, 100);
        let id = create_window(&mut fx.compositor, &mut client, 0, 0, 4, 2, WindowAttr::Normal);
        request(
            &mut fx.compositor,
            client.id,
            Request::DrawFill {
                id,
                width: 4,
                height: 2,
                cells: vec![Cell::new('X', 0, 0); 8],
            },
        );
        request(&mut fx.compositor, client.id, Request::Render { id });
        assert_eq!(fx.handle.cell(3, 1).glyph(), Some('X'));

        request(
            &mut fx.compositor,
            client.id,
            Request::Resize {
                id,
                width: 6,
                height: 3,
            },
        );
        let layer = fx.compositor.layers.get(id).unwrap();
        assert!(!layer.visible);
        assert_eq!((layer.width, layer.height), (6, 3));
        assert_eq!(layer.cell(5, 2), Some(Cell::default()));
    }

    #[test]
    fn draw_fill_dimension_mismatch_is_dropped() {
        let mut fx = fixture(20, 10);
        let mut client = attach(&mut fx.compositor, 100);
        let id = create_window(&mut fx.compositor, &mut client, 0, 0, 4, 2, WindowAttr::Normal);
        request(
            &mut fx.compositor,
            client.id,
            Request::DrawFill {
                id,
                width: 3,
                height: 2,
                cells: vec![Cell::new('X', 0, 0); 6],
            },
        );
        // Canvas untouched.
        assert_eq!(
            fx.compositor.layers.get(id).unwrap().cell(0, 0),
            Some(Cell::default())
        );
    }

    #[test]
    fn delete_passes_selection_to_layer_behind() {
        let mut fx = fixture(20, 10);
        let mut client = attach(&mut fx.compositor, 400);
        let a = create_window(&mut fx.compositor, &mut client, 0, 0, 2, 2, WindowAttr::Normal);
        let b = create_window(&mut fx.compositor, &mut client, 0, 0, 2, 2, WindowAttr::Normal);
        assert_eq!(fx.compositor.selected, b);

        // Order is [b, a]; deleting b hands the selection to a.
        request(&mut fx.compositor, client.id, Request::Delete { id: b });
        assert_eq!(fx.compositor.selected, a);
        assert!(!fx.compositor.layers.contains(b));

        request(&mut fx.compositor, client.id, Request::Delete { id: a });
        assert_eq!(fx.compositor.selected, 0);
        assert_eq!(fx.compositor.layers.len(), 0);

        // Stale ids are dropped quietly.
        request(&mut fx.compositor, client.id, Request::Delete { id: a });
        request(&mut fx.compositor, client.id, Request::Render { id: b });
    }

    #[test]
    fn get_replies_to_owner() {
        let mut fx = fixture(20, 10);
        let mut owner = attach(&mut fx.compositor, 200);
        let mut other = attach(&mut fx.compositor, 300);
        let id = create_window(&mut fx.compositor, &mut owner, 0, 0, 2, 2, WindowAttr::Normal);
        request(
            &mut fx.compositor,
            owner.id,
            Request::Draw {
                id,
                x: 1,
                y: 1,
                cell: Cell::new('G', 0, 0),
            },
        );

        // Whoever asks, the answer goes to the layer's owner.
        request(&mut fx.compositor, other.id, Request::Get { id, x: 1, y: 1 });
        match owner.replies.try_recv().unwrap() {
            Reply::GetCell { cell } => assert_eq!(cell.glyph(), Some('G')),
            other => panic!("unexpected reply {other:?}"),
        }
        assert!(other.replies.try_recv().is_err());

        // Out-of-bounds reads are dropped, not fatal.
        request(&mut fx.compositor, owner.id, Request::Get { id, x: 5, y: 0 });
        assert!(owner.replies.try_recv().is_err());
    }

    #[test]
    fn screen_reports_size_and_mode() {
        let mut fx = fixture(20, 10);
        let mut client = attach(&mut fx.compositor, 200);
        let id = create_window(&mut fx.compositor, &mut client, 0, 0, 2, 2, WindowAttr::Normal);
        request(&mut fx.compositor, client.id, Request::Screen { id });
        match client.replies.try_recv().unwrap() {
            Reply::Screen {
                width,
                height,
                mode,
            } => {
                assert_eq!((width, height), (20, 10));
                assert_eq!(mode, strata_ipc::OutputMode::Rgb);
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn detach_forgets_channels() {
        let mut fx = fixture(20, 10);
        let mut client = attach(&mut fx.compositor, 200);
        let id = create_window(&mut fx.compositor, &mut client, 0, 0, 2, 2, WindowAttr::Normal);
        fx.compositor
            .handle_command(Command::Detach { client: 200 })
            .unwrap();
        assert!(fx.compositor.reply_channels.is_empty());
        assert!(fx.compositor.event_channels.is_empty());

        // Requests for the departed client's layer still process; replies
        // just have nowhere to go.
        request(&mut fx.compositor, client.id, Request::Screen { id });
        assert!(client.replies.try_recv().is_err());
    }
}
