use std::fmt;
use std::str::FromStr;
use ash::vk;
use color_eyre::eyre::Report;
use serde::Deserialize;
use crate::renderer::error::RenderError;

/// Which triangle faces are discarded during rasterization
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
    FrontAndBack,
}

/// Winding order that counts as front-facing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

impl CullMode {
    const TABLE: &'static [(Self, &'static str, vk::CullModeFlags)] = &[
        (Self::None, "none", vk::CullModeFlags::NONE),
        (Self::Front, "front", vk::CullModeFlags::FRONT),
        (Self::Back, "back", vk::CullModeFlags::BACK),
        (Self::FrontAndBack, "front_and_back", vk::CullModeFlags::FRONT_AND_BACK),
    ];

    pub fn to_vk(self) -> vk::CullModeFlags {
        Self::TABLE
            .iter()
            .find(|(mode, _, _)| *mode == self)
            .map_or(vk::CullModeFlags::NONE, |(_, _, flags)| *flags)
    }

    pub fn name(self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(mode, _, _)| *mode == self)
            .map_or("none", |(_, name, _)| name)
    }
}

impl FrontFace {
    const TABLE: &'static [(Self, &'static str, vk::FrontFace)] = &[
        (Self::CounterClockwise, "counter_clockwise", vk::FrontFace::COUNTER_CLOCKWISE),
        (Self::Clockwise, "clockwise", vk::FrontFace::CLOCKWISE),
    ];

    pub fn to_vk(self) -> vk::FrontFace {
        Self::TABLE
            .iter()
            .find(|(face, _, _)| *face == self)
            .map_or(vk::FrontFace::COUNTER_CLOCKWISE, |(_, _, face)| *face)
    }

    pub fn name(self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(face, _, _)| *face == self)
            .map_or("counter_clockwise", |(_, name, _)| name)
    }
}

impl FromStr for CullMode {
    type Err = Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::TABLE
            .iter()
            .find(|(_, name, _)| name.eq_ignore_ascii_case(s))
            .map(|(mode, _, _)| *mode)
            .ok_or_else(|| RenderError::invalid(format!("unknown cull mode {:?}", s)))
    }
}

impl FromStr for FrontFace {
    type Err = Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::TABLE
            .iter()
            .find(|(_, name, _)| name.eq_ignore_ascii_case(s))
            .map(|(face, _, _)| *face)
            .ok_or_else(|| RenderError::invalid(format!("unknown front face {:?}", s)))
    }
}

/// Raw values follow the native flag bits
impl TryFrom<u32> for CullMode {
    type Error = Report;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::TABLE
            .iter()
            .find(|(_, _, flags)| flags.as_raw() == raw)
            .map(|(mode, _, _)| *mode)
            .ok_or_else(|| RenderError::invalid(format!("unknown cull mode value {}", raw)))
    }
}

impl TryFrom<i32> for FrontFace {
    type Error = Report;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        Self::TABLE
            .iter()
            .find(|(_, _, face)| face.as_raw() == raw)
            .map(|(face, _, _)| *face)
            .ok_or_else(|| RenderError::invalid(format!("unknown front face value {}", raw)))
    }
}

impl TryFrom<String> for CullMode {
    type Error = Report;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl TryFrom<String> for FrontFace {
    type Error = Report;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for CullMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for FrontFace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cull_mode_table() {
        assert_eq!(CullMode::None.to_vk(), vk::CullModeFlags::NONE);
        assert_eq!(CullMode::Front.to_vk(), vk::CullModeFlags::FRONT);
        assert_eq!(CullMode::Back.to_vk(), vk::CullModeFlags::BACK);
        assert_eq!(CullMode::FrontAndBack.to_vk(), vk::CullModeFlags::FRONT_AND_BACK);
    }

    #[test]
    fn test_front_face_table() {
        assert_eq!(FrontFace::CounterClockwise.to_vk(), vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(FrontFace::Clockwise.to_vk(), vk::FrontFace::CLOCKWISE);
    }

    #[test]
    fn test_names_parse_back() {
        for mode in [CullMode::None, CullMode::Front, CullMode::Back, CullMode::FrontAndBack] {
            assert_eq!(mode.to_string().parse::<CullMode>().unwrap(), mode);
        }
        assert_eq!("Clockwise".parse::<FrontFace>().unwrap(), FrontFace::Clockwise);
    }

    #[test]
    fn test_raw_values() {
        assert_eq!(CullMode::try_from(2).unwrap(), CullMode::Back);
        assert_eq!(FrontFace::try_from(1).unwrap(), FrontFace::Clockwise);

        let err = CullMode::try_from(7).unwrap_err();
        assert!(matches!(RenderError::of(&err), Some(RenderError::InvalidArgument(_))));
        assert!(FrontFace::try_from(-1).is_err());
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        let err = "sideways".parse::<CullMode>().unwrap_err();
        assert!(matches!(RenderError::of(&err), Some(RenderError::InvalidArgument(_))));
        assert!("up".parse::<FrontFace>().is_err());
    }

    #[test]
    fn test_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Raster {
            cull_mode: CullMode,
            front_face: FrontFace,
        }
        let raster: Raster = toml::from_str(
            r#"
            cull_mode = "back"
            front_face = "clockwise"
            "#,
        )
        .unwrap();
        assert_eq!(raster.cull_mode, CullMode::Back);
        assert_eq!(raster.front_face, FrontFace::Clockwise);
    }
}
