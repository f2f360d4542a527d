//! eFuse-backed key source for ESP32.
//!
//! Reads a 256-bit key from eFuse block 3. An erased block (all zeros or
//! all ones) is reported as unprogrammed so the manager can fall back to
//! the fixed development key while flagging the store as insecure.

use zeroize::Zeroize;

use super::crypto::KEY_LEN;
use super::keysource::{KeyMaterial, KeySource, KeySourceError};

/// Key source reading from the ESP32 eFuse controller.
pub struct EfuseKeySource;

impl KeySource for EfuseKeySource {
    fn load_key(&mut self) -> Result<KeyMaterial, KeySourceError> {
        let mut key = [0u8; KEY_LEN];
        let err = unsafe {
            esp_idf_sys::esp_efuse_read_block(
                esp_idf_sys::esp_efuse_block_t_EFUSE_BLK3,
                key.as_mut_ptr() as *mut core::ffi::c_void,
                0,
                KEY_LEN * 8,
            )
        };
        if err != esp_idf_sys::ESP_OK {
            key.zeroize();
            return Err(KeySourceError::Unavailable(format!(
                "esp_efuse_read_block returned {}",
                err
            )));
        }

        let erased = key.iter().all(|&b| b == 0x00) || key.iter().all(|&b| b == 0xFF);
        if erased {
            key.zeroize();
            return Err(KeySourceError::Unprogrammed);
        }

        Ok(KeyMaterial {
            key,
            hardware_backed: true,
        })
    }
}
