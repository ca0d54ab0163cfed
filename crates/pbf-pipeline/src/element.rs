use std::collections::HashMap;

/// OSM tags are canonically `string → string` (unlike the generic `string →
/// typed value` the model allows for in the abstract); see DESIGN.md.
pub type Tags = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberType {
    Node,
    Way,
    Relation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationMember {
    pub member_type: MemberType,
    pub ref_id: i64,
    pub role: String,
}

/// Scaled `HeaderBBox` (§11 supplemented feature): `left/right/top/bottom`
/// in degrees, already divided by `1e9`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileHeader {
    pub bbox: Option<BoundingBox>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    pub id: i64,
    pub node_refs: Vec<i64>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub id: i64,
    pub members: Vec<RelationMember>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OsmElement {
    FileHeader(FileHeader),
    Node(Node),
    Way(Way),
    Relation(Relation),
}
