//! Synthetic topology generation and document loading.

use crate::conf::NodeConf;
use crate::error::{GenerationError, Result};
use crate::schema::SchemaValidator;
use crate::tank::TankId;
use crate::topology::{AttrValue, Attributes, Topology, TopologyDocument};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

/// Node release tags images are published for, newest first.
pub const SUPPORTED_TAGS: [&str; 6] = ["27.0", "26.0", "25.1", "24.2", "23.2", "22.2"];

/// Tag used when nothing else is specified.
pub const DEFAULT_TAG: &str = SUPPORTED_TAGS[0];

/// Extra outbound edges attempted per vertex on top of the ring.
pub const EXTRA_OUTBOUND: usize = 7;

/// Tags weighted towards older releases.
///
/// The newest tag appears once, the next twice, and so on.
pub fn weighted_tags() -> Vec<&'static str> {
    SUPPORTED_TAGS
        .iter()
        .rev()
        .enumerate()
        .flat_map(|(index, tag)| std::iter::repeat(*tag).take(index + 1))
        .collect()
}

/// Returns true for `<repo>#<branch>` source-build references.
pub fn is_source_build(version: &str) -> bool {
    version.contains('/') && version.contains('#')
}

/// Knobs for [`TopologyGenerator::generate_cycle`].
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Version for every vertex. Defaults to [`DEFAULT_TAG`].
    pub version: Option<String>,
    /// Draw each vertex's version from [`weighted_tags`].
    pub random_version: bool,
    /// Config overlay for every vertex, INI or compact form.
    pub bitcoin_config: Option<String>,
    /// Seed for reproducible graphs.
    pub seed: Option<u64>,
}

/// Builds synthetic graphs and loads user documents.
#[derive(Debug, Clone, Default)]
pub struct TopologyGenerator {
    validator: SchemaValidator,
}

impl TopologyGenerator {
    /// Creates a generator validating against `validator`'s schema.
    pub fn new(validator: SchemaValidator) -> Self {
        Self { validator }
    }

    /// Generates a ring of `n` vertices, optionally with random extra edges.
    ///
    /// With `random_extra`, each vertex makes up to [`EXTRA_OUTBOUND`] attempts
    /// to add an outbound edge to a uniformly chosen vertex it is not yet
    /// adjacent to in either direction.
    pub fn generate_cycle(
        &self,
        n: usize,
        random_extra: bool,
        options: &GenerateOptions,
    ) -> std::result::Result<Topology, GenerationError> {
        if n < 1 {
            return Err(GenerationError::TooFewVertices(n));
        }
        let version = options.version.as_deref().unwrap_or(DEFAULT_TAG);
        if !SUPPORTED_TAGS.contains(&version) && !is_source_build(version) {
            return Err(GenerationError::UnsupportedVersion(version.to_string()));
        }

        let mut rng = match options.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let weighted = weighted_tags();
        let overlay = options
            .bitcoin_config
            .as_deref()
            .map(|raw| NodeConf::parse_overlay(raw, None).to_options())
            .unwrap_or_default();

        let mut topology = Topology::new();
        for _ in 0..n {
            let version = if options.random_version {
                weighted.choose(&mut rng).copied().unwrap_or(DEFAULT_TAG)
            } else {
                version
            };
            let mut attributes = Attributes::new();
            attributes.insert("version".into(), AttrValue::from(version));
            attributes.insert("bitcoin_config".into(), AttrValue::from(overlay.as_str()));
            attributes.insert("tc_netem".into(), AttrValue::from(""));
            attributes.insert("build_args".into(), AttrValue::from(""));
            attributes.insert("exporter".into(), AttrValue::Bool(false));
            attributes.insert("collect_logs".into(), AttrValue::Bool(false));
            attributes.insert("resources".into(), AttrValue::from("default"));
            attributes.insert("tor".into(), AttrValue::Bool(false));
            attributes.insert("ln".into(), AttrValue::Bool(false));
            topology.add_vertex(attributes);
        }

        if n > 1 {
            for i in 0..n {
                let source = TankId(i as u32);
                let target = TankId(((i + 1) % n) as u32);
                // n == 2 closes the ring with the reverse edge, which is distinct.
                if let Err(err) = topology.add_edge(source, target) {
                    debug!(%err, "ring edge skipped");
                }
            }
        }

        if random_extra {
            for i in 0..n {
                let source = TankId(i as u32);
                for _ in 0..EXTRA_OUTBOUND {
                    let candidates: Vec<TankId> = (0..n as u32)
                        .map(TankId)
                        .filter(|&t| t != source && !topology.adjacent(source, t))
                        .collect();
                    let Some(&target) = candidates.choose(&mut rng) else {
                        break;
                    };
                    if topology.add_edge(source, target).is_ok() {
                        debug!(%source, %target, "added extra edge");
                    }
                }
            }
        }

        info!(
            vertices = n,
            edges = topology.edges().len(),
            random_extra,
            "generated cycle topology"
        );
        Ok(topology)
    }

    /// Parses and validates a YAML or JSON document.
    pub fn load_and_validate(&self, raw: &str) -> Result<Topology> {
        let document = TopologyDocument::from_yaml(raw)?;
        Ok(self.validator.validate(&document)?)
    }

    /// Validates an already-parsed document.
    pub fn load_document(&self, document: &TopologyDocument) -> Result<Topology> {
        Ok(self.validator.validate(document)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn seeded(seed: u64) -> GenerateOptions {
        GenerateOptions {
            seed: Some(seed),
            ..Default::default()
        }
    }

    #[test]
    fn test_cycle_without_extras_is_a_ring() {
        let t = TopologyGenerator::default()
            .generate_cycle(10, false, &seeded(1))
            .unwrap();
        assert_eq!(t.vertices().len(), 10);
        assert_eq!(t.edges().len(), 10);
        for i in 0..10u32 {
            assert!(t.has_edge(TankId(i), TankId((i + 1) % 10)));
            assert_eq!(t.out_degree(TankId(i)), 1);
        }
    }

    #[test]
    fn test_cycle_with_extras_respects_degree_bound() {
        for seed in 0..20 {
            let t = TopologyGenerator::default()
                .generate_cycle(10, true, &seeded(seed))
                .unwrap();
            let mut seen = HashSet::new();
            for e in t.edges() {
                assert_ne!(e.source, e.target);
                assert!(seen.insert((e.source, e.target)), "duplicate {e}");
            }
            for i in 0..10u32 {
                assert!(t.has_edge(TankId(i), TankId((i + 1) % 10)));
                assert!(t.out_degree(TankId(i)) <= 8);
            }
            assert!(t.edges().len() >= 10);
        }
    }

    #[test]
    fn test_too_few_vertices() {
        let err = TopologyGenerator::default()
            .generate_cycle(0, false, &GenerateOptions::default())
            .unwrap_err();
        assert_eq!(err, GenerationError::TooFewVertices(0));
    }

    #[test]
    fn test_single_vertex_has_no_edges() {
        let t = TopologyGenerator::default()
            .generate_cycle(1, true, &seeded(3))
            .unwrap();
        assert_eq!(t.vertices().len(), 1);
        assert!(t.edges().is_empty());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let options = GenerateOptions {
            version: Some("0.1".into()),
            ..Default::default()
        };
        assert!(TopologyGenerator::default()
            .generate_cycle(3, false, &options)
            .is_err());
    }

    #[test]
    fn test_weighted_tags_favour_older_releases() {
        let tags = weighted_tags();
        assert_eq!(tags.len(), 21);
        assert_eq!(tags.iter().filter(|t| **t == "27.0").count(), 1);
        assert_eq!(tags.iter().filter(|t| **t == "22.2").count(), 6);
    }

    #[test]
    fn test_random_versions_are_supported_tags() {
        let options = GenerateOptions {
            random_version: true,
            seed: Some(9),
            ..Default::default()
        };
        let t = TopologyGenerator::default()
            .generate_cycle(12, false, &options)
            .unwrap();
        for v in t.vertices() {
            assert!(SUPPORTED_TAGS.contains(&v.version().unwrap()));
        }
    }

    #[test]
    fn test_overlay_is_stored_in_compact_form() {
        let options = GenerateOptions {
            bitcoin_config: Some("[regtest]\ndebug=net\nlisten=1\n".into()),
            ..seeded(0)
        };
        let t = TopologyGenerator::default()
            .generate_cycle(2, false, &options)
            .unwrap();
        assert_eq!(t.vertices()[0].config_overlay(), Some("debug=net,listen=1"));
    }

    #[test]
    fn test_generated_topology_round_trips_through_yaml() {
        let generator = TopologyGenerator::default();
        for seed in 0..5 {
            let original = generator.generate_cycle(8, true, &seeded(seed)).unwrap();
            let yaml = original.to_document().to_yaml().unwrap();
            let reloaded = generator.load_and_validate(&yaml).unwrap();
            assert_eq!(original, reloaded);
        }
    }

    #[test]
    fn test_generated_topology_round_trips_through_json() {
        let generator = TopologyGenerator::default();
        let original = generator.generate_cycle(4, true, &seeded(11)).unwrap();
        let json = original.to_document().to_json().unwrap();
        assert_eq!(generator.load_and_validate(&json).unwrap(), original);
    }
}
