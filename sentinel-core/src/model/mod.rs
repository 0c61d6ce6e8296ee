pub mod event;
pub mod session;
pub mod user_model;
pub mod window;

pub use event::{KeyEvent, KeyEventKind, KeyboardBatch, MouseBatch, MouseEvent, MouseEventKind};
pub use session::{KeyboardBuilder, Mode, Phase, SessionState, TofuContext};
pub use user_model::{ModelType, UserModel};
pub use window::FeatureWindow;
