#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]

pub mod plugins;
pub mod util;
