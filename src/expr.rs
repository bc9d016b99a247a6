//! Earth Engine expression graphs.
//!
//! The REST API doesn't take the fluent method chains that the client
//! libraries expose; it takes a serialized graph of function invocations.
//! A chain like `ImageCollection(id).filterBounds(g).sort(k).first()` turns
//! into nested `functionInvocationValue` nodes, each naming an algorithm from
//! the public catalog and binding its arguments. We only build the handful of
//! shapes that the thumbnail service needs, and we always inline nodes rather
//! than sharing them through `valueReference`s.

use serde_json::{json, Map, Value};

/// Query constants that select a candidate image.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneQuery {
    pub collection: &'static str,
    pub start_date: &'static str,
    pub end_date: &'static str,
    pub cloud_property: &'static str,
    pub max_cloud_percent: f64,
}

/// A single node in the graph.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Constant(Value),
    Invocation {
        function: &'static str,
        arguments: Vec<(&'static str, Node)>,
    },
}

impl Node {
    pub fn constant<V: Into<Value>>(v: V) -> Self {
        Node::Constant(v.into())
    }

    pub fn call(function: &'static str, arguments: Vec<(&'static str, Node)>) -> Self {
        Node::Invocation {
            function,
            arguments,
        }
    }

    fn to_value_node(&self) -> Value {
        match self {
            Node::Constant(v) => json!({ "constantValue": v }),
            Node::Invocation {
                function,
                arguments,
            } => {
                let args: Map<String, Value> = arguments
                    .iter()
                    .map(|(name, node)| ((*name).to_owned(), node.to_value_node()))
                    .collect();

                json!({
                    "functionInvocationValue": {
                        "functionName": function,
                        "arguments": args,
                    }
                })
            }
        }
    }

    /// Serialize as a top-level `Expression` object.
    pub fn to_expression(&self) -> Value {
        json!({
            "result": "0",
            "values": { "0": self.to_value_node() },
        })
    }
}

/// A polygon from a single outer ring of `[lng, lat]` pairs.
pub fn polygon(ring: &[[f64; 2]]) -> Node {
    let ring: Vec<Value> = ring.iter().map(|p| json!([p[0], p[1]])).collect();

    Node::call(
        "GeometryConstructors.Polygon",
        vec![
            ("coordinates", Node::constant(json!([ring]))),
            ("evenOdd", Node::constant(true)),
        ],
    )
}

fn filter(collection: Node, filter: Node) -> Node {
    Node::call(
        "Collection.filter",
        vec![("collection", collection), ("filter", filter)],
    )
}

/// `ImageCollection(id).filterBounds(geom).filterDate(..).filter(lt(..)).sort(..).first()`
pub fn first_matching_image(query: &SceneQuery, geometry: Node) -> Node {
    let mut coll = Node::call(
        "ImageCollection.load",
        vec![("id", Node::constant(query.collection))],
    );

    coll = filter(
        coll,
        Node::call(
            "Filter.intersects",
            vec![
                ("leftField", Node::constant(".all")),
                ("rightValue", geometry),
            ],
        ),
    );

    coll = filter(
        coll,
        Node::call(
            "Filter.dateRangeContains",
            vec![
                (
                    "leftValue",
                    Node::call(
                        "DateRange",
                        vec![
                            ("start", Node::constant(query.start_date)),
                            ("end", Node::constant(query.end_date)),
                        ],
                    ),
                ),
                ("rightField", Node::constant("system:time_start")),
            ],
        ),
    );

    coll = filter(
        coll,
        Node::call(
            "Filter.lessThan",
            vec![
                ("leftField", Node::constant(query.cloud_property)),
                ("rightValue", Node::constant(query.max_cloud_percent)),
            ],
        ),
    );

    // The client libraries implement `sort` as an unbounded `limit`.
    coll = Node::call(
        "Collection.limit",
        vec![
            ("collection", coll),
            ("key", Node::constant(query.cloud_property)),
            ("ascending", Node::constant(true)),
        ],
    );

    Node::call("Collection.first", vec![("collection", coll)])
}

/// Reference a stored image by asset ID.
pub fn load_image(id: &str) -> Node {
    Node::call("Image.load", vec![("id", Node::constant(id))])
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUERY: SceneQuery = SceneQuery {
        collection: "COPERNICUS/S2_SR",
        start_date: "2024-01-01",
        end_date: "2024-06-01",
        cloud_property: "CLOUDY_PIXEL_PERCENTAGE",
        max_cloud_percent: 20.,
    };

    fn ring() -> Vec<[f64; 2]> {
        vec![[-70.0, -33.0], [-70.0, -33.1], [-70.1, -33.1], [-70.0, -33.0]]
    }

    #[test]
    fn constants_serialize_as_constant_values() {
        let e = Node::constant(3).to_expression();
        assert_eq!(e["result"], "0");
        assert_eq!(e["values"]["0"]["constantValue"], 3);
    }

    #[test]
    fn polygon_wraps_ring_once() {
        let v = polygon(&ring()).to_expression();
        let inv = &v["values"]["0"]["functionInvocationValue"];
        assert_eq!(inv["functionName"], "GeometryConstructors.Polygon");
        let coords = &inv["arguments"]["coordinates"]["constantValue"];
        assert_eq!(coords.as_array().unwrap().len(), 1);
        assert_eq!(coords[0].as_array().unwrap().len(), 4);
        assert_eq!(coords[0][1], json!([-70.0, -33.1]));
    }

    #[test]
    fn query_graph_has_the_expected_layers() {
        let v = first_matching_image(&QUERY, polygon(&ring())).to_expression();
        let first = &v["values"]["0"]["functionInvocationValue"];
        assert_eq!(first["functionName"], "Collection.first");

        let sorted = &first["arguments"]["collection"]["functionInvocationValue"];
        assert_eq!(sorted["functionName"], "Collection.limit");
        assert_eq!(
            sorted["arguments"]["key"]["constantValue"],
            "CLOUDY_PIXEL_PERCENTAGE"
        );
        assert_eq!(sorted["arguments"]["ascending"]["constantValue"], true);

        let clouds = &sorted["arguments"]["collection"]["functionInvocationValue"];
        let lt = &clouds["arguments"]["filter"]["functionInvocationValue"];
        assert_eq!(lt["functionName"], "Filter.lessThan");
        assert_eq!(lt["arguments"]["rightValue"]["constantValue"], 20.0);

        let dates = &clouds["arguments"]["collection"]["functionInvocationValue"];
        let range = &dates["arguments"]["filter"]["functionInvocationValue"]["arguments"]
            ["leftValue"]["functionInvocationValue"];
        assert_eq!(range["functionName"], "DateRange");
        assert_eq!(range["arguments"]["start"]["constantValue"], "2024-01-01");
        assert_eq!(range["arguments"]["end"]["constantValue"], "2024-06-01");

        let bounds = &dates["arguments"]["collection"]["functionInvocationValue"];
        assert_eq!(
            bounds["arguments"]["filter"]["functionInvocationValue"]["functionName"],
            "Filter.intersects"
        );

        let load = &bounds["arguments"]["collection"]["functionInvocationValue"];
        assert_eq!(load["functionName"], "ImageCollection.load");
        assert_eq!(load["arguments"]["id"]["constantValue"], "COPERNICUS/S2_SR");
    }

    #[test]
    fn image_load() {
        let v = load_image("COPERNICUS/S2_SR/20240115T143731_20240115T144553_T19HCC")
            .to_expression();
        let inv = &v["values"]["0"]["functionInvocationValue"];
        assert_eq!(inv["functionName"], "Image.load");
        assert_eq!(
            inv["arguments"]["id"]["constantValue"],
            "COPERNICUS/S2_SR/20240115T143731_20240115T144553_T19HCC"
        );
    }
}
