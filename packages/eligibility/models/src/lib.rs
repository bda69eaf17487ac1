#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Good Cause Eviction eligibility rules.
//!
//! This crate holds the one definition of whether a building is covered by
//! Good Cause Eviction protections. The generator applies [`evaluate`] when
//! it materializes the `gce_eligibility` table, and every read path (map
//! queries, district overlays, CSV exports) reads the stored result, so the
//! rule cannot drift between queries.

use chrono::{Datelike as _, NaiveDate};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator as _;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// PLUTO building classes covered by the law (walk-ups, elevator
/// apartments, and mixed residential/store buildings).
pub const ELIGIBLE_BUILDING_CLASSES: &[&str] = &[
    "C0", "C1", "C2", "C3", "C4", "C5", "C7", "C9", "CB", "CM", "D1", "D2", "D3", "D5", "D6", "D7",
    "D8", "D9", "DB", "S0", "S1", "S2", "S3", "S4", "S5", "S9",
];

/// Buildings built (or first issued a certificate of occupancy) in or after
/// this year are exempt.
pub const CONSTRUCTION_YEAR_CUTOFF: i32 = 2009;

/// Minimum residential unit count for a building to be covered.
pub const MIN_RESIDENTIAL_UNITS: i32 = 10;

/// A subsidy program tracked by the Furman Center Subsidized Housing
/// Database. Any active program exempts the building.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, AsRefStr, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum SubsidyProgram {
    /// Low-Income Housing Tax Credit administered by HCR.
    Hcrlihtc,
    /// HPD-financed affordable housing.
    Hpd,
    /// Low-Income Housing Tax Credit administered by HUD.
    Hudlihtc,
    /// HUD project-based contracts.
    Hudcon,
    /// HUD-financed or insured mortgages.
    Hudfin,
    /// Mitchell-Lama.
    Ml,
    /// Public housing.
    Nycha,
}

impl SubsidyProgram {
    /// Returns the `fc_shd_building` flag column for this program
    /// (e.g. `datahpd`).
    #[must_use]
    pub fn column(self) -> String {
        format!("data{}", self.as_ref())
    }

    /// Human-readable program name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Hcrlihtc => "HCR LIHTC",
            Self::Hpd => "HPD",
            Self::Hudlihtc => "HUD LIHTC",
            Self::Hudcon => "HUD Contract",
            Self::Hudfin => "HUD Financing",
            Self::Ml => "Mitchell-Lama",
            Self::Nycha => "NYCHA",
        }
    }

    /// Returns every tracked program.
    #[must_use]
    pub fn all() -> Vec<Self> {
        Self::iter().collect()
    }

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// The set of subsidy programs flagging a building.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubsidyFlags {
    bits: u8,
}

impl SubsidyFlags {
    /// No subsidy flags set.
    #[must_use]
    pub const fn none() -> Self {
        Self { bits: 0 }
    }

    /// Returns a copy with `program` set to `active`.
    #[must_use]
    pub const fn with(mut self, program: SubsidyProgram, active: bool) -> Self {
        if active {
            self.bits |= program.bit();
        } else {
            self.bits &= !program.bit();
        }
        self
    }

    /// Whether `program` flags the building.
    #[must_use]
    pub const fn contains(self, program: SubsidyProgram) -> bool {
        self.bits & program.bit() != 0
    }

    /// Whether any program flags the building.
    #[must_use]
    pub const fn any(self) -> bool {
        self.bits != 0
    }

    /// The flagged programs, in declaration order.
    pub fn programs(self) -> impl Iterator<Item = SubsidyProgram> {
        SubsidyProgram::iter().filter(move |program| self.contains(*program))
    }

    /// Labels of the flagged programs joined with `", "`, or `None` when
    /// no program flags the building.
    #[must_use]
    pub fn describe(self) -> Option<String> {
        self.any().then(|| {
            self.programs()
                .map(SubsidyProgram::label)
                .collect::<Vec<_>>()
                .join(", ")
        })
    }
}

impl FromIterator<SubsidyProgram> for SubsidyFlags {
    fn from_iter<T: IntoIterator<Item = SubsidyProgram>>(iter: T) -> Self {
        iter.into_iter()
            .fold(Self::none(), |flags, program| flags.with(program, true))
    }
}

/// The building attributes the rule looks at.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildingFacts<'a> {
    /// PLUTO building class code.
    pub bldgclass: Option<&'a str>,
    /// PLUTO year built (`0` when unknown).
    pub yearbuilt: Option<i32>,
    /// Issue date of the earliest certificate of occupancy, if any.
    pub co_issued: Option<NaiveDate>,
    /// Residential unit count.
    pub unitsres: Option<i32>,
    /// Rent-stabilized units registered after the 2019 HSTPA.
    pub post_hstpa_rs_units: Option<i32>,
    /// Active subsidy programs.
    pub subsidies: SubsidyFlags,
}

/// Per-criterion eligibility result. `eligible` is the conjunction of the
/// building class, certificate of occupancy, portfolio size, and subsidy
/// criteria.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityBreakdown {
    /// Building class is in [`ELIGIBLE_BUILDING_CLASSES`].
    pub eligible_bldgclass: bool,
    /// Built before [`CONSTRUCTION_YEAR_CUTOFF`].
    pub eligible_co: bool,
    /// Has units not already covered by rent stabilization. Informational.
    pub eligible_rent_stab: bool,
    /// No subsidy program flags the building.
    pub eligible_subsidy: bool,
    /// At least [`MIN_RESIDENTIAL_UNITS`] residential units.
    pub eligible_portfolio_size: bool,
    /// Covered by Good Cause Eviction.
    pub eligible: bool,
}

/// Whether `bldgclass` is a covered building class.
#[must_use]
pub fn is_eligible_building_class(bldgclass: &str) -> bool {
    ELIGIBLE_BUILDING_CLASSES.contains(&bldgclass.trim())
}

/// Applies the eligibility rule to a building.
#[must_use]
pub fn evaluate(facts: &BuildingFacts<'_>) -> EligibilityBreakdown {
    let eligible_bldgclass = facts.bldgclass.is_some_and(is_eligible_building_class);

    let eligible_co = facts.co_issued.map_or_else(
        || {
            facts
                .yearbuilt
                .is_some_and(|year| year < CONSTRUCTION_YEAR_CUTOFF)
        },
        |issued| issued.year() < CONSTRUCTION_YEAR_CUTOFF,
    );

    let units = facts.unitsres.unwrap_or(0);
    let eligible_portfolio_size = units >= MIN_RESIDENTIAL_UNITS;
    let eligible_rent_stab = facts.post_hstpa_rs_units.unwrap_or(0) < units;
    let eligible_subsidy = !facts.subsidies.any();

    EligibilityBreakdown {
        eligible_bldgclass,
        eligible_co,
        eligible_rent_stab,
        eligible_subsidy,
        eligible_portfolio_size,
        eligible: eligible_bldgclass && eligible_co && eligible_portfolio_size && eligible_subsidy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walkup() -> BuildingFacts<'static> {
        BuildingFacts {
            bldgclass: Some("C1"),
            yearbuilt: Some(1950),
            co_issued: None,
            unitsres: Some(20),
            post_hstpa_rs_units: None,
            subsidies: SubsidyFlags::none(),
        }
    }

    #[test]
    fn unsubsidized_prewar_walkup_is_eligible() {
        let result = evaluate(&walkup());
        assert!(result.eligible);
        assert!(result.eligible_bldgclass);
        assert!(result.eligible_co);
        assert!(result.eligible_subsidy);
        assert!(result.eligible_portfolio_size);
    }

    #[test]
    fn hpd_subsidy_exempts_building() {
        let facts = BuildingFacts {
            subsidies: SubsidyFlags::none().with(SubsidyProgram::Hpd, true),
            ..walkup()
        };
        let result = evaluate(&facts);
        assert!(!result.eligible);
        assert!(!result.eligible_subsidy);
        assert!(result.eligible_bldgclass);
    }

    #[test]
    fn every_subsidy_program_exempts() {
        for program in SubsidyProgram::all() {
            let facts = BuildingFacts {
                subsidies: [program].into_iter().collect(),
                ..walkup()
            };
            assert!(!evaluate(&facts).eligible, "{program} should exempt");
        }
    }

    #[test]
    fn new_construction_is_exempt() {
        let facts = BuildingFacts {
            yearbuilt: Some(2009),
            ..walkup()
        };
        assert!(!evaluate(&facts).eligible);
    }

    #[test]
    fn certificate_of_occupancy_overrides_year_built() {
        let facts = BuildingFacts {
            yearbuilt: Some(1950),
            co_issued: NaiveDate::from_ymd_opt(2012, 3, 1),
            ..walkup()
        };
        assert!(!evaluate(&facts).eligible_co);

        let facts = BuildingFacts {
            yearbuilt: Some(2015),
            co_issued: NaiveDate::from_ymd_opt(2008, 12, 31),
            ..walkup()
        };
        assert!(evaluate(&facts).eligible_co);
    }

    #[test]
    fn small_buildings_are_exempt() {
        let facts = BuildingFacts {
            unitsres: Some(9),
            ..walkup()
        };
        assert!(!evaluate(&facts).eligible);
        assert!(!evaluate(&facts).eligible_portfolio_size);
    }

    #[test]
    fn non_residential_class_is_exempt() {
        let facts = BuildingFacts {
            bldgclass: Some("O4"),
            ..walkup()
        };
        assert!(!evaluate(&facts).eligible);
        assert!(!evaluate(&BuildingFacts {
            bldgclass: None,
            ..walkup()
        })
        .eligible);
    }

    #[test]
    fn rent_stabilization_is_informational() {
        let facts = BuildingFacts {
            post_hstpa_rs_units: Some(20),
            ..walkup()
        };
        let result = evaluate(&facts);
        assert!(!result.eligible_rent_stab);
        assert!(result.eligible);
    }

    #[test]
    fn subsidy_columns_match_shd_schema() {
        assert_eq!(SubsidyProgram::Hpd.column(), "datahpd");
        assert_eq!(SubsidyProgram::Hcrlihtc.column(), "datahcrlihtc");
        assert_eq!(SubsidyProgram::all().len(), 7);
        assert_eq!("nycha".parse::<SubsidyProgram>(), Ok(SubsidyProgram::Nycha));
    }

    #[test]
    fn subsidy_flags_can_be_cleared() {
        let flags = SubsidyFlags::none()
            .with(SubsidyProgram::Ml, true)
            .with(SubsidyProgram::Ml, false);
        assert!(!flags.any());
        assert!(!flags.contains(SubsidyProgram::Ml));
    }

    #[test]
    fn describe_lists_flagged_programs_in_order() {
        let flags: SubsidyFlags = [SubsidyProgram::Nycha, SubsidyProgram::Hpd]
            .into_iter()
            .collect();
        assert_eq!(flags.describe().as_deref(), Some("HPD, NYCHA"));
        assert_eq!(SubsidyFlags::none().describe(), None);
    }
}
