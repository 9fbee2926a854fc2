//! GeneralizedTime (`YYYYMMDDhhmmssZ`) stamping, shared by operational
//! attribute stamping (spec §3) and change event timestamps (spec §4.J).

use chrono::Utc;

pub fn generalized_time_now() -> String {
    Utc::now().format("%Y%m%d%H%M%SZ").to_string()
}
