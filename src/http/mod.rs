//! HTTP surface
//!
//! | Method and path                  | Response                            |
//! |----------------------------------|-------------------------------------|
//! | `GET /health`                    | `{"status":"ok","service":...}`     |
//! | `POST /process/remove-background`| PNG, `<token>_processed.png`        |
//! | `POST /process/segment`          | PNG, `<token>_segmented.png`        |
//! | `GET /models`                    | `{"models":[...]}`                  |
//! | `DELETE /cleanup`                | `{"message":"Cleaned up N files"}`  |

pub mod errors;
pub mod handlers;
pub mod router;
pub mod state;
pub mod upload;

pub use errors::{ApiError, ErrorBody};
pub use router::{build_router, serve};
pub use state::AppState;
