//! Pointer gesture tracking.
//!
//! A gesture is a mouse-button press followed by drags and a release. The
//! tracker remembers which layer received the press and the cursor offset
//! into it, so every later event of the gesture is dispatched to the same
//! layer in the same local coordinate frame even when the cursor strays
//! over other windows.

use strata_ipc::{ClientId, InputEvent, Key, LayerId};

#[derive(Debug)]
pub struct GestureTracker {
    key: Key,
    layer: LayerId,
    owner: ClientId,
    layer_x: i32,
    layer_y: i32,
}

impl Default for GestureTracker {
    fn default() -> Self {
        Self {
            key: Key::None,
            layer: 0,
            owner: 0,
            layer_x: 0,
            layer_y: 0,
        }
    }
}

impl GestureTracker {
    /// True when `event` continues the recorded gesture: the previous key
    /// was a mouse button and the new one is a mouse button or the release.
    pub fn continues(&self, event: &InputEvent) -> bool {
        let Some(new_key) = event.mouse_key() else {
            return false;
        };
        self.key.is_mouse_button() && (new_key.is_mouse_button() || new_key == Key::MouseRelease)
    }

    /// The pinned target for a continuation at screen position `(x, y)`:
    /// owner, layer and layer-local coordinates using the offset captured at
    /// gesture start.
    pub fn target(&self, x: i32, y: i32) -> (ClientId, LayerId, i32, i32) {
        (self.owner, self.layer, x - self.layer_x, y - self.layer_y)
    }

    /// Record the outcome of a mouse dispatch: the freshly decided owner and
    /// layer, and the screen-minus-local offset of the dispatched event.
    pub fn save(
        &mut self,
        owner: ClientId,
        key: Key,
        layer: LayerId,
        event_x: i32,
        event_y: i32,
        local_x: i32,
        local_y: i32,
    ) {
        self.key = key;
        self.layer = layer;
        self.owner = owner;
        self.layer_x = event_x - local_x;
        self.layer_y = event_y - local_y;
    }
}
