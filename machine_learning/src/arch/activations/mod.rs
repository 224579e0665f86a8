mod act_fn;
mod relu;
mod sigmoid;
mod softmax;

pub use act_fn::ActFn;
pub use relu::Relu;
pub use sigmoid::Sigmoid;
pub use softmax::softmax_rows;
