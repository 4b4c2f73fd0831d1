use tracing::warn;

use crate::error::{Error, Result};

/// Default name of the appended intersection-area column.
pub const AREA_INTERSECTION_COLUMN: &str = "areaInters";
/// Default name of the appended percentage column.
pub const PERCENT_COVER_COLUMN: &str = "perc_cover";

/// Map styling for an overlay layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerStyle {
    pub fill_color: &'static str,
    pub color: &'static str,
    pub opacity: f64,
    pub weight: f64,
}

impl LayerStyle {
    const fn filled(fill_color: &'static str) -> Self {
        Self {
            fill_color,
            color: "black",
            opacity: 1.0,
            weight: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommunityDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    /// Base-layer attribute holding the area the percentage is measured against.
    pub reference_area: &'static str,
    /// Tooltip fields and their labels, paired by position.
    pub fields: &'static [&'static str],
    pub aliases: &'static [&'static str],
    pub style: LayerStyle,
}

static BUILTIN: &[CommunityDescriptor] = &[
    CommunityDescriptor {
        id: "justice40",
        display_name: "Justice40 Layer",
        reference_area: "area",
        fields: &["NAME", "County", "TractID", "Tot_Pop", PERCENT_COVER_COLUMN, "Type_1"],
        aliases: &["Name:", "County:", "Tract ID:", "Population:", "Percent Area Covered:", "Type:"],
        style: LayerStyle::filled("blue"),
    },
    CommunityDescriptor {
        id: "coal_closure",
        display_name: "Energy Communities - Coal Layer",
        reference_area: "area",
        fields: &["NAME", "County", "TractID", "label", PERCENT_COVER_COLUMN, "Type_1"],
        aliases: &["Name:", "County:", "TractID:", "Label:", "Percent Area Covered:", "Type:"],
        style: LayerStyle::filled("red"),
    },
    CommunityDescriptor {
        id: "fossil_fuel",
        display_name: "Energy Communities - FFE Layer",
        reference_area: "area",
        fields: &["NAME", "County", "TractIDcty", "MSA_NMSA", PERCENT_COVER_COLUMN, "Type_1"],
        aliases: &["Name:", "County:", "CountyID:", "MSA/NMSA:", "Percent Area Covered:", "Type:"],
        style: LayerStyle::filled("green"),
    },
    CommunityDescriptor {
        id: "low_income",
        display_name: "Low-Income Communities Layer",
        reference_area: "area",
        fields: &["NAME", "County", "tractId", PERCENT_COVER_COLUMN, "Type_1"],
        aliases: &["Name:", "County:", "Tract ID:", "Percent Area Covered:", "Type:"],
        style: LayerStyle::filled("purple"),
    },
    CommunityDescriptor {
        id: "distressed_communities",
        display_name: "Distressed Communities Layer",
        reference_area: "area",
        fields: &["NAME", "Zipcode", "Quintile (5=Distressed)", PERCENT_COVER_COLUMN, "Type_1"],
        aliases: &["Name:", "ZIP Code:", "DCI Quintile:", "Percent Area Covered:", "Type:"],
        style: LayerStyle::filled("orange"),
    },
];

/// Closed catalog of community types the overlay engine accepts.
#[derive(Debug, Clone)]
pub struct CommunityRegistry {
    entries: &'static [CommunityDescriptor],
}

impl Default for CommunityRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CommunityRegistry {
    pub fn builtin() -> Self {
        Self { entries: BUILTIN }
    }

    pub fn get(&self, id: &str) -> Option<&'static CommunityDescriptor> {
        self.entries.iter().find(|d| d.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = &'static str> {
        self.entries.iter().map(|d| d.id)
    }

    pub fn descriptors(&self) -> &'static [CommunityDescriptor] {
        self.entries
    }

    /// Look up `id`, failing with a validation error for unknown names.
    pub fn validate(&self, id: &str) -> Result<&'static CommunityDescriptor> {
        self.get(id).ok_or_else(|| {
            warn!(community = id, "Rejected unknown community");
            Error::Validation(format!("Invalid community dataset name: {}", id))
        })
    }
}
