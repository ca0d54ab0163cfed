use log::warn;
use prost::Message;
use rayon::prelude::*;

use pbf_proto::{relation::MemberType as PbfMemberType, HeaderBlock, PrimitiveBlock, PrimitiveGroup};

use crate::blob::{PayloadKind, PbfBlobData};
use crate::element::{BoundingBox, FileHeader, MemberType, Node, OsmElement, Relation, RelationMember, Tags, Way};
use crate::error::{Error, Result};
use crate::field_decoder::FieldDecoder;

bitflags::bitflags! {
    /// Classes of primitive to skip during decode (§6 `skip_options`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SkipOptions: u8 {
        const NODES     = 0b001;
        const WAYS      = 0b010;
        const RELATIONS = 0b100;
    }
}

const KNOWN_REQUIRED_FEATURES: &[&str] = &["OsmSchema-V0.6", "DenseNodes"];

/// Options carried into a [`PbfDecoder`] from [`crate::config::Config`].
#[derive(Debug, Clone, Copy)]
pub struct DecoderOptions {
    pub skip: SkipOptions,
    /// DESIGN.md Open Question 1: whether an unrecognized
    /// `HeaderBlock.required_features` entry fails the block.
    pub strict_required_features: bool,
    /// Pre-flight ceiling on the buffer a zlib-compressed blob inflates
    /// into, checked before the final flattening allocation rather than
    /// derived from the (much smaller) compressed size.
    pub max_alloc_bytes: u64,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self { skip: SkipOptions::empty(), strict_required_features: true, max_alloc_bytes: 64 * 1024 * 1024 }
    }
}

/// C8: decompresses a blob's payload, parses the protobuf, and produces OSM
/// elements.
pub struct PbfDecoder {
    options: DecoderOptions,
}

impl PbfDecoder {
    pub fn new(options: DecoderOptions) -> Self {
        Self { options }
    }

    pub fn decode(&self, blob: PbfBlobData) -> Result<Vec<OsmElement>> {
        let uncompressed = match blob.payload_kind {
            PayloadKind::Raw => blob
                .payload
                .data()
                .ok_or(pbf_core::Error::BufferReleased)?
                .to_vec(),
            PayloadKind::Zlib => {
                let src = blob.payload.data().ok_or(pbf_core::Error::BufferReleased)?;
                pbf_core::inflate(src, self.options.max_alloc_bytes)?.data().ok_or(pbf_core::Error::BufferReleased)?.to_vec()
            }
        };

        match blob.header_type.as_str() {
            "OSMHeader" => {
                let header = HeaderBlock::decode(uncompressed.as_slice())?;
                Ok(vec![OsmElement::FileHeader(self.decode_header(header)?)])
            }
            "OSMData" => {
                let block = PrimitiveBlock::decode(uncompressed.as_slice())?;
                self.decode_primitive_block(&block)
            }
            other => {
                warn!("decoder: ignoring unknown blob type {other:?}");
                Ok(Vec::new())
            }
        }
    }

    fn decode_header(&self, header: HeaderBlock) -> Result<FileHeader> {
        for feature in &header.required_features {
            if !KNOWN_REQUIRED_FEATURES.contains(&feature.as_str()) {
                if self.options.strict_required_features {
                    return Err(Error::UnknownRequiredFeature { feature: feature.clone() });
                }
                warn!("decoder: unknown required_features entry {feature:?}, continuing");
            }
        }

        let mut tags = Tags::new();
        if let Some(ts) = header.osmosis_replication_timestamp {
            tags.insert("osmosis_replication_timestamp".into(), ts.to_string());
        }
        if let Some(seq) = header.osmosis_replication_sequence_number {
            tags.insert("osmosis_replication_sequence_number".into(), seq.to_string());
        }
        if let Some(url) = header.osmosis_replication_base_url.clone() {
            tags.insert("osmosis_replication_base_url".into(), url);
        }
        if let Some(program) = header.writingprogram.clone() {
            tags.insert("writingprogram".into(), program);
        }
        if let Some(source) = header.source.clone() {
            tags.insert("source".into(), source);
        }
        if !header.optional_features.is_empty() {
            tags.insert("optional_features".into(), header.optional_features.join(","));
        }

        let bbox = header.bbox.map(|b| BoundingBox {
            left: 1e-9 * b.left as f64,
            right: 1e-9 * b.right as f64,
            top: 1e-9 * b.top as f64,
            bottom: 1e-9 * b.bottom as f64,
        });

        Ok(FileHeader { bbox, tags })
    }

    fn decode_primitive_block(&self, block: &PrimitiveBlock) -> Result<Vec<OsmElement>> {
        // Independent primitive groups decode in parallel; order within the
        // collected output follows group order, matching how a sequential
        // implementation would emit them.
        let groups: Vec<Vec<OsmElement>> = block
            .primitivegroup
            .par_iter()
            .map(|group| self.decode_group(block, group))
            .collect::<Result<Vec<_>>>()?;
        Ok(groups.into_iter().flatten().collect())
    }

    fn decode_group(&self, block: &PrimitiveBlock, group: &PrimitiveGroup) -> Result<Vec<OsmElement>> {
        let fd = FieldDecoder::new(block);
        let mut out = Vec::new();

        if !self.options.skip.contains(SkipOptions::NODES) {
            if let Some(dense) = &group.dense {
                out.extend(decode_dense_nodes(&fd, dense)?.into_iter().map(OsmElement::Node));
            }
            for node in &group.nodes {
                if let Some(n) = decode_sparse_node(&fd, node) {
                    out.push(OsmElement::Node(n));
                }
            }
        }

        if !self.options.skip.contains(SkipOptions::WAYS) {
            for way in &group.ways {
                out.push(OsmElement::Way(decode_way(&fd, way)));
            }
        }

        if !self.options.skip.contains(SkipOptions::RELATIONS) {
            for relation in &group.relations {
                if let Some(r) = decode_relation(&fd, relation) {
                    out.push(OsmElement::Relation(r));
                }
            }
        }

        Ok(out)
    }
}

fn decode_sparse_node(fd: &FieldDecoder<'_>, node: &pbf_proto::Node) -> Option<Node> {
    let tags = fd.tags_from_keys_vals(&node.keys, &node.vals)?;
    Some(Node { id: node.id, lat: fd.lat(node.lat), lon: fd.lon(node.lon), tags })
}

fn decode_dense_nodes(fd: &FieldDecoder<'_>, dense: &pbf_proto::DenseNodes) -> Result<Vec<Node>> {
    if dense.id.len() != dense.lat.len() || dense.id.len() != dense.lon.len() {
        return Err(Error::InvariantViolation {
            entity: "DenseNodes",
            detail: format!("id.len()={}, lat.len()={}, lon.len()={}", dense.id.len(), dense.lat.len(), dense.lon.len()),
        });
    }

    let mut nodes = Vec::with_capacity(dense.id.len());
    let (mut id, mut lat, mut lon) = (0i64, 0i64, 0i64);
    let mut kv_iter = dense.keys_vals.iter().copied().peekable();

    for i in 0..dense.id.len() {
        id += dense.id[i];
        lat += dense.lat[i];
        lon += dense.lon[i];

        let mut tags = Tags::new();
        while let Some(&key_sid) = kv_iter.peek() {
            if key_sid == 0 {
                kv_iter.next();
                break;
            }
            kv_iter.next();
            let Some(val_sid) = kv_iter.next() else { break };
            if let (Some(k), Some(v)) = (fd.string(key_sid as usize), fd.string(val_sid as usize)) {
                tags.insert(k.to_owned(), v.to_owned());
            }
        }

        nodes.push(Node { id, lat: fd.lat(lat), lon: fd.lon(lon), tags });
    }

    Ok(nodes)
}

fn decode_way(fd: &FieldDecoder<'_>, way: &pbf_proto::Way) -> Way {
    let mut node_refs = Vec::with_capacity(way.refs.len());
    let mut running = 0i64;
    for delta in &way.refs {
        running += delta;
        node_refs.push(running);
    }
    let tags = fd.tags_from_keys_vals(&way.keys, &way.vals).unwrap_or_default();
    Way { id: way.id, node_refs, tags }
}

fn decode_relation(fd: &FieldDecoder<'_>, relation: &pbf_proto::Relation) -> Option<Relation> {
    if relation.memids.len() != relation.roles_sid.len() || relation.memids.len() != relation.types.len() {
        return None;
    }

    let mut members = Vec::with_capacity(relation.memids.len());
    let mut running = 0i64;
    for i in 0..relation.memids.len() {
        running += relation.memids[i];
        let role = fd.string(relation.roles_sid[i] as usize).unwrap_or("").to_owned();
        let member_type = match PbfMemberType::try_from(relation.types[i]) {
            Ok(PbfMemberType::Node) => MemberType::Node,
            Ok(PbfMemberType::Way) => MemberType::Way,
            Ok(PbfMemberType::Relation) => MemberType::Relation,
            Err(_) => return None,
        };
        members.push(RelationMember { member_type, ref_id: running, role });
    }

    let tags = fd.tags_from_keys_vals(&relation.keys, &relation.vals).unwrap_or_default();
    Some(Relation { id: relation.id, members, tags })
}
