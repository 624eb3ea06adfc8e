/// Packed FAT timestamp reported to the filesystem.
///
/// There is no real time clock behind the driver, so every file gets the
/// same time: 2007-06-05 11:38:00.
pub const fn fat_timestamp() -> u32 {
    ((2007 - 1980) << 25) // year
        | (6 << 21) // month
        | (5 << 16) // day
        | (11 << 11) // hour
        | (38 << 5) // minute, seconds are zero
}

#[cfg(test)]
mod tests {
    use super::fat_timestamp;

    #[test]
    fn test_fields() {
        let t = fat_timestamp();
        assert_eq!((t >> 25) + 1980, 2007);
        assert_eq!((t >> 21) & 0x0F, 6);
        assert_eq!((t >> 16) & 0x1F, 5);
        assert_eq!((t >> 11) & 0x1F, 11);
        assert_eq!((t >> 5) & 0x3F, 38);
        assert_eq!(t & 0x1F, 0);
    }
}
