/// Picks the node that owns chunk `id` of `filename`.
///
/// The key is `filename` followed by the decimal id, hashed with CRC-32 and
/// reduced modulo the node count. This is plain modulo hashing: changing
/// the node list remaps most chunks.
///
/// # Panics
///
/// Panics if `nodes` is empty.
pub fn place<'a, N: AsRef<str>>(filename: &str, id: u64, nodes: &'a [N]) -> &'a str {
    assert!(!nodes.is_empty(), "placement needs at least one node");

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(filename.as_bytes());
    hasher.update(id.to_string().as_bytes());
    let index = hasher.finalize() as usize % nodes.len();
    nodes[index].as_ref()
}
