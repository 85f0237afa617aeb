use crate::index_space::IndexSpace;




/**
 * A patch is a mapping from a rectangular index space to a fixed number of
 * field values per zone. The data is laid out field-major: each field is a
 * contiguous array in the index space's memory order.
 *
 * Patches hold cell-centered conserved variables (over a block's interior
 * plus ghost zones), the face-centered components of a vector field, and
 * the fluxes through a block's faces.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    space: IndexSpace,
    num_fields: usize,
    data: Vec<f64>,
}




impl Patch {




    /**
     * Generate a patch of zeros covering the given space.
     */
    pub fn zeros(space: IndexSpace, num_fields: usize) -> Self {
        let data = vec![0.0; space.len() * num_fields];
        Self { space, num_fields, data }
    }




    /**
     * Generate a patch covering the given space, with values defined from a
     * closure taking the field number and the index.
     */
    pub fn from_function<F>(space: IndexSpace, num_fields: usize, f: F) -> Self
    where
        F: Fn(usize, [i64; 3]) -> f64,
    {
        let mut data = Vec::with_capacity(space.len() * num_fields);

        for q in 0..num_fields {
            data.extend(space.iter().map(|index| f(q, index)))
        }
        Self { space, num_fields, data }
    }




    /**
     * Build a patch around an existing buffer. Returns None if the buffer
     * size does not match.
     */
    pub fn from_vec(space: IndexSpace, num_fields: usize, data: Vec<f64>) -> Option<Self> {
        if data.len() == space.len() * num_fields {
            Some(Self { space, num_fields, data })
        } else {
            None
        }
    }


    pub fn space(&self) -> &IndexSpace {
        &self.space
    }


    pub fn num_fields(&self) -> usize {
        self.num_fields
    }


    pub fn data(&self) -> &[f64] {
        &self.data
    }


    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }




    /**
     * Return the value of a field at the given index.
     */
    pub fn get(&self, field: usize, index: [i64; 3]) -> f64 {
        self.data[self.offset(field, index)]
    }


    pub fn get_mut(&mut self, field: usize, index: [i64; 3]) -> &mut f64 {
        let n = self.offset(field, index);
        &mut self.data[n]
    }


    pub fn set(&mut self, field: usize, index: [i64; 3], value: f64) {
        let n = self.offset(field, index);
        self.data[n] = value
    }




    /**
     * Append the values of all fields in the given region to a buffer, field
     * by field, each in memory order.
     */
    pub fn pack(&self, region: &IndexSpace, out: &mut Vec<f64>) {
        for q in 0..self.num_fields {
            for index in region.iter() {
                out.push(self.get(q, index))
            }
        }
    }




    /**
     * Overwrite the values in the given region from a buffer laid out as
     * `pack` writes it. Returns the number of values consumed, or None
     * (leaving the patch untouched) if the buffer is too short.
     */
    pub fn unpack(&mut self, region: &IndexSpace, data: &[f64]) -> Option<usize> {
        if data.len() < region.len() * self.num_fields {
            return None;
        }
        let mut n = 0;

        for q in 0..self.num_fields {
            for index in region.iter() {
                self.set(q, index, data[n]);
                n += 1;
            }
        }
        Some(n)
    }




    fn offset(&self, field: usize, index: [i64; 3]) -> usize {
        self.validate_index(index);
        field * self.space.len() + self.space.row_major_offset(index)
    }


    fn validate_index(&self, index: [i64; 3]) {
        if !self.space.contains(index) {
            panic!("index ({} {} {}) out of range on patch {:?}",
                index[0],
                index[1],
                index[2],
                self.space);
        }
    }
}




/**
 * The face-centered components of a vector field. Component `a` lives on
 * the faces normal to axis `a`, so its index space has one extra entry along
 * that axis.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct FaceField {
    pub x: [Patch; 3],
}

impl FaceField {
    pub fn zeros(cells: &IndexSpace) -> Self {
        Self {
            x: [
                Patch::zeros(staggered(cells, 0), 1),
                Patch::zeros(staggered(cells, 1), 1),
                Patch::zeros(staggered(cells, 2), 1),
            ],
        }
    }
}




/**
 * Return the face space normal to `axis` for a space of cells.
 */
pub fn staggered(cells: &IndexSpace, axis: usize) -> IndexSpace {
    let mut end = cells.end();
    end[axis] += 1;
    IndexSpace::new(cells.start(), end)
}
