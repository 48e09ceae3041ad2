#![cfg_attr(not(test), no_std)]

pub mod sdmmc;
pub mod sdmmc_os;
pub mod sdmmc_traits;
