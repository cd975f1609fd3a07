pub mod dailynav;
pub mod json_file;
pub mod util;

pub use dailynav::DailyNavProvider;
pub use json_file::{JsonBtcPriceProvider, JsonObservationProvider};
