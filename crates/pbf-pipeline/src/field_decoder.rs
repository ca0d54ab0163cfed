use pbf_proto::PrimitiveBlock;

/// Decodes the scaled/string-table fields carried by one `PrimitiveBlock`
/// (§4.6.1). Cheap to construct; borrows the block it wraps.
pub struct FieldDecoder<'a> {
    block: &'a PrimitiveBlock,
}

impl<'a> FieldDecoder<'a> {
    pub fn new(block: &'a PrimitiveBlock) -> Self {
        Self { block }
    }

    pub fn granularity(&self) -> i64 {
        self.block.granularity.unwrap_or(100) as i64
    }

    pub fn date_granularity(&self) -> i64 {
        self.block.date_granularity.unwrap_or(1000) as i64
    }

    pub fn lat_offset(&self) -> i64 {
        self.block.lat_offset.unwrap_or(0) as i64
    }

    pub fn lon_offset(&self) -> i64 {
        self.block.lon_offset.unwrap_or(0) as i64
    }

    pub fn string(&self, index: usize) -> Option<&str> {
        let bytes = self.block.stringtable.as_ref()?.s.get(index)?;
        std::str::from_utf8(bytes).ok()
    }

    pub fn lat(&self, raw: i64) -> f64 {
        1e-9 * (self.lat_offset() + self.granularity() * raw) as f64
    }

    pub fn lon(&self, raw: i64) -> f64 {
        1e-9 * (self.lon_offset() + self.granularity() * raw) as f64
    }

    pub fn timestamp(&self, raw: i64) -> i64 {
        self.date_granularity() * raw
    }

    /// Zips `keys[]`/`vals[]` string-table indices into a tag map. Returns
    /// `None` on length mismatch (§4.6.2: "skip that node, do not fail the
    /// block" is the caller's responsibility).
    pub fn tags_from_keys_vals(&self, keys: &[u32], vals: &[u32]) -> Option<crate::element::Tags> {
        if keys.len() != vals.len() {
            return None;
        }
        let mut tags = crate::element::Tags::with_capacity(keys.len());
        for (&k, &v) in keys.iter().zip(vals) {
            let key = self.string(k as usize)?;
            let val = self.string(v as usize)?;
            tags.insert(key.to_owned(), val.to_owned());
        }
        Some(tags)
    }
}
