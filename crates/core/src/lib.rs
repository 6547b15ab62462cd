// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! operf-core: shared primitives for the operf measurement workspace

pub mod clock;
pub mod dates;
pub mod fs;
pub mod host;

pub use clock::{Clock, FakeClock, SystemClock};
pub use dates::{archive_stamp, date_to_string, utc_date_of};
pub use fs::{find_file_paths, make_dir_path, random_free_port};
pub use host::{find_ip_address, local_hostname, local_ip_address};
