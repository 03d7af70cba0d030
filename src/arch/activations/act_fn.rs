use super::Sigmoid;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActFn {
    Sigmoid(Sigmoid),
}
use ActFn::*;

impl ActFn {
    pub fn sigmoid() -> Self {
        Sigmoid(Sigmoid::default())
    }

    pub fn f(&self, z: f32) -> f32 {
        match self {
            Sigmoid(a) => a.f(z),
        }
    }

    /// The derivative at the point whose image is `a`.
    pub fn df(&self, a: f32) -> f32 {
        match self {
            Sigmoid(s) => s.df(a),
        }
    }
}
