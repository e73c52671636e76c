pub mod adjustments;
pub mod inpaint;
