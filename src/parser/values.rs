//! Typed attribute readers
//!
//! Every getter takes the default used when the attribute is absent. A
//! present but malformed value is an [`SceneError::InvalidField`] naming the
//! node kind and the attribute.

use glam::{Vec2, Vec3};

use crate::error::{invalid_field, SceneResult};
use crate::parser::markup::Element;
use crate::scene::fields::{AxisAngle, Color, ColorSpace};

/// Split a numeric attribute into tokens; commas count as whitespace
pub fn tokens(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
}

/// Parse a space separated list of quoted strings: `'"a.png" "b.png"'`
///
/// An unquoted value is split on whitespace.
pub fn string_list(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('"') {
        return trimmed.split_whitespace().map(str::to_string).collect();
    }
    trimmed
        .split('"')
        .skip(1)
        .step_by(2)
        .map(str::to_string)
        .collect()
}

/// Parse a whole attribute as `f32` values
pub fn parse_floats(raw: &str) -> Result<Vec<f32>, String> {
    tokens(raw)
        .map(|token| {
            token
                .parse::<f32>()
                .map_err(|_| format!("'{}' is not a number", token))
        })
        .collect()
}

/// Attribute view of one element, tagged with its node kind for errors
pub struct Attributes<'a> {
    kind: &'static str,
    element: &'a Element,
}

impl<'a> Attributes<'a> {
    pub fn new(kind: &'static str, element: &'a Element) -> Self {
        Self { kind, element }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn string(&self, name: &str) -> Option<&'a str> {
        self.element.attribute(name)
    }

    pub fn string_or(&self, name: &str, default: &str) -> String {
        self.string(name).unwrap_or(default).to_string()
    }

    pub fn string_list(&self, name: &str) -> Vec<String> {
        self.string(name).map(string_list).unwrap_or_default()
    }

    pub fn bool(&self, name: &str, default: bool) -> SceneResult<bool> {
        match self.string(name).map(str::trim) {
            None => Ok(default),
            Some("true" | "TRUE") => Ok(true),
            Some("false" | "FALSE") => Ok(false),
            Some(other) => Err(invalid_field(
                self.kind,
                name,
                format!("'{}' is not a boolean", other),
            )),
        }
    }

    fn floats<const N: usize>(&self, name: &str) -> SceneResult<Option<[f32; N]>> {
        let Some(raw) = self.string(name) else {
            return Ok(None);
        };
        let values = parse_floats(raw).map_err(|message| invalid_field(self.kind, name, message))?;
        let array: [f32; N] = values.try_into().map_err(|values: Vec<f32>| {
            invalid_field(
                self.kind,
                name,
                format!("expected {} numbers, found {}", N, values.len()),
            )
        })?;
        Ok(Some(array))
    }

    pub fn f32(&self, name: &str, default: f32) -> SceneResult<f32> {
        Ok(self.floats::<1>(name)?.map_or(default, |[value]| value))
    }

    pub fn i32(&self, name: &str, default: i32) -> SceneResult<i32> {
        match self.string(name).map(str::trim) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| invalid_field(self.kind, name, format!("'{}' is not an integer", raw))),
        }
    }

    pub fn u32(&self, name: &str, default: u32) -> SceneResult<u32> {
        match self.string(name).map(str::trim) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| {
                invalid_field(
                    self.kind,
                    name,
                    format!("'{}' is not a non-negative integer", raw),
                )
            }),
        }
    }

    pub fn vec2(&self, name: &str, default: Vec2) -> SceneResult<Vec2> {
        Ok(self.floats::<2>(name)?.map_or(default, Vec2::from_array))
    }

    pub fn vec3(&self, name: &str, default: Vec3) -> SceneResult<Vec3> {
        Ok(self.floats::<3>(name)?.map_or(default, Vec3::from_array))
    }

    pub fn rotation(&self, name: &str) -> SceneResult<AxisAngle> {
        Ok(self
            .floats::<4>(name)?
            .map_or(AxisAngle::IDENTITY, |[x, y, z, angle]| {
                AxisAngle::new(Vec3::new(x, y, z), angle)
            }))
    }

    pub fn color(&self, name: &str, default: [f32; 3], space: ColorSpace) -> SceneResult<Color> {
        Ok(Color::from_array(
            self.floats::<3>(name)?.unwrap_or(default),
            space,
        ))
    }

    pub fn f32_list(&self, name: &str) -> SceneResult<Vec<f32>> {
        match self.string(name) {
            None => Ok(Vec::new()),
            Some(raw) => parse_floats(raw).map_err(|message| invalid_field(self.kind, name, message)),
        }
    }

    pub fn i32_list(&self, name: &str) -> SceneResult<Option<Vec<i32>>> {
        let Some(raw) = self.string(name) else {
            return Ok(None);
        };
        tokens(raw)
            .map(|token| {
                token.parse::<i32>().map_err(|_| {
                    invalid_field(self.kind, name, format!("'{}' is not an integer", token))
                })
            })
            .collect::<SceneResult<Vec<_>>>()
            .map(Some)
    }

    fn grouped<const N: usize>(&self, name: &str) -> SceneResult<Vec<[f32; N]>> {
        let values = self.f32_list(name)?;
        if values.len() % N != 0 {
            return Err(invalid_field(
                self.kind,
                name,
                format!("expected a multiple of {} numbers, found {}", N, values.len()),
            ));
        }
        Ok(values
            .chunks_exact(N)
            .map(|chunk| {
                let mut array = [0.0; N];
                array.copy_from_slice(chunk);
                array
            })
            .collect())
    }

    pub fn vec2_list(&self, name: &str) -> SceneResult<Vec<Vec2>> {
        Ok(self.grouped::<2>(name)?.into_iter().map(Vec2::from_array).collect())
    }

    pub fn vec3_list(&self, name: &str) -> SceneResult<Vec<Vec3>> {
        Ok(self.grouped::<3>(name)?.into_iter().map(Vec3::from_array).collect())
    }
}
