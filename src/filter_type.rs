use crate::{BlocklistError, Result};
use std::{fmt, str::FromStr};

/// The kinds of element hiding rules that can be turned into Privoxy content filters.
///
/// Each kind is enabled separately, since content filters cost Privoxy considerably more than URL blocking. The
/// string names are the ones accepted on the command line, in the `FILTERS` environment variable and in the options
/// file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterType {
    /// Elements selected by attribute presence: `##[data-ad]`.
    AttributeName,
    /// Elements selected by exact attribute value: `##[data-role="ad"]`.
    AttributeExact,
    /// Elements selected by an attribute value substring: `##[onclick*="ad/"]`.
    AttributeContain,
    /// Elements selected by an attribute value prefix: `##[class^="ad-"]`.
    AttributeStartsWith,
    /// Elements selected by an attribute value suffix: `##[src$=".gif"]`.
    AttributeEndsWith,
    /// Elements selected by class: `##.banner`.
    Class,
    /// Elements selected by id: `###banner`.
    Id,
}

impl FilterType {
    /// Every filter type, in the order they appear in generated files.
    pub const ALL: [FilterType; 7] = [
        FilterType::AttributeName,
        FilterType::AttributeExact,
        FilterType::AttributeContain,
        FilterType::AttributeStartsWith,
        FilterType::AttributeEndsWith,
        FilterType::Class,
        FilterType::Id,
    ];

    /// Returns the filter type's name.
    pub fn name(self) -> &'static str {
        match self {
            FilterType::AttributeName => "attribute_global_name",
            FilterType::AttributeExact => "attribute_global_exact",
            FilterType::AttributeContain => "attribute_global_contain",
            FilterType::AttributeStartsWith => "attribute_global_startswith",
            FilterType::AttributeEndsWith => "attribute_global_endswith",
            FilterType::Class => "class_global",
            FilterType::Id => "id_global",
        }
    }

    pub(crate) fn description(self) -> &'static str {
        match self {
            FilterType::AttributeName => "elements with a blocked attribute",
            FilterType::AttributeExact => "elements with a blocked attribute value",
            FilterType::AttributeContain => "elements with an attribute containing a blocked value",
            FilterType::AttributeStartsWith => "elements with an attribute starting with a blocked value",
            FilterType::AttributeEndsWith => "elements with an attribute ending with a blocked value",
            FilterType::Class => "elements with a blocked class",
            FilterType::Id => "elements with a blocked id",
        }
    }

    /// Parses every name in the given iterator, failing on the first unknown one.
    pub fn parse_many<I, S>(names: I) -> Result<Vec<FilterType>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut types = Vec::new();
        for name in names {
            let ty = name.as_ref().parse()?;
            if !types.contains(&ty) {
                types.push(ty);
            }
        }

        Ok(types)
    }

    /// Returns the names of every filter type.
    pub fn all_names() -> Vec<String> {
        FilterType::ALL.iter().map(|ty| ty.name().to_string()).collect()
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for FilterType {
    type Err = BlocklistError;

    fn from_str(s: &str) -> Result<Self> {
        FilterType::ALL
            .iter()
            .copied()
            .find(|ty| ty.name() == s.trim())
            .ok_or_else(|| BlocklistError::UnknownFilter(s.to_string(), FilterType::all_names().join(" ")))
    }
}

#[cfg(test)]
mod tests {
    use super::FilterType;
    use crate::BlocklistError;

    #[test]
    fn parse_known_names() {
        for ty in FilterType::ALL {
            assert_eq!(ty.name().parse::<FilterType>().unwrap(), ty);
        }
    }

    #[test]
    fn reject_unknown_name() {
        let parsed = "class_local".parse::<FilterType>();
        assert!(matches!(parsed, Err(BlocklistError::UnknownFilter(name, _)) if name == "class_local"));
    }

    #[test]
    fn parse_many_deduplicates() {
        let types = FilterType::parse_many(["id_global", "class_global", "id_global"]).unwrap();
        assert_eq!(types, vec![FilterType::Id, FilterType::Class]);
    }

    #[test]
    fn parse_many_fails_on_first_unknown() {
        let parsed = FilterType::parse_many(["id_global", "bogus", "also_bogus"]);
        assert!(matches!(parsed, Err(BlocklistError::UnknownFilter(name, _)) if name == "bogus"));
    }
}
