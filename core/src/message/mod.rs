// Message module: routed messages, forwarding decisions and wire framing

pub mod codec;
pub mod router;
pub mod types;

pub use codec::{decode_frame, encode_frame, WireFrame, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};
pub use router::{ForwardPlan, MessageRouter, RouteOutcome, RoutingContext, RoutingStrategy};
pub use types::{DeliveryStatus, MeshMessage, MessageKind, Priority};
